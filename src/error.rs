use std::path::PathBuf;
use thiserror::Error;

/// Main error type for calldoc operations
#[derive(Error, Debug)]
pub enum CalldocError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("No top-level declaration named `{name}` in {path}")]
    DeclarationNotFound { path: PathBuf, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Failed to read processed store {path}: {reason}")]
    StoreRead { path: PathBuf, reason: String },

    #[error("Failed to write processed store {path}: {reason}")]
    StoreWrite { path: PathBuf, reason: String },

    #[error("Failed to splice documentation into {path}: {reason}")]
    Splice { path: PathBuf, reason: String },
}

impl CalldocError {
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Errors that only affect a single root or file and never abort a run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::DeclarationNotFound { .. } | Self::Splice { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CalldocError>;
