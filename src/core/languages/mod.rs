//! Language-specific parsers
//!
//! Each language gets its own module with a consistent interface for turning
//! source text into declarations, call sites and imports.

mod python;

pub use python::PythonParser;

use crate::error::Result;
use super::ParsedUnit;

/// Trait that all language parsers must implement
pub trait LanguageParser: Send {
    /// Parse source code into top-level declarations and imports
    fn parse(&mut self, content: &str, file_path: &std::path::Path) -> Result<ParsedUnit>;

    /// Get the file extensions this parser handles
    fn file_extensions(&self) -> &[&str];
}
