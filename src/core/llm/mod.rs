//! LLM integration for generating docstrings
//!
//! A trait-based seam: the traversal only sees `DocumentationSink`, and the
//! HTTP providers live behind it.

mod documenter;
mod providers;

pub use documenter::{clean_docstring, DocumentationSink, SinkError};
pub use providers::{create_sink, LlmSink};
