//! Bottom-up docstring generation over a static Python call graph.
//!
//! Functions are documented callees first, so every docstring request carries
//! the documentation of what the function calls. Generated docstrings are
//! cached by content fingerprint and spliced back into the source files.

pub mod config;
pub mod core;
pub mod error;
