use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by a documentation sink for a single request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Sink configuration error: {0}")]
    Config(String),

    #[error("Failed to render prompt: {0}")]
    Prompt(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider returned an empty docstring")]
    EmptyResponse,

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation task aborted: {0}")]
    Aborted(String),
}

/// Collaborator that turns a declaration plus child context into a docstring.
///
/// `code` is the declaration's raw source; `context` is the concatenated
/// documentation of its callees (possibly empty). Implementations are shared
/// across concurrent dispatches.
#[async_trait]
pub trait DocumentationSink: Send + Sync {
    async fn generate(&self, code: &str, context: &str) -> Result<String, SinkError>;

    /// Get the name of this sink
    fn name(&self) -> &str {
        "sink"
    }
}

/// Strip surrounding quote runs and whitespace from a model response
pub fn clean_docstring(raw: &str) -> Result<String, SinkError> {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```").and_then(|t| t.strip_suffix("```")) {
        // Drop an optional language tag on the opening fence
        text = inner.split_once('\n').map(|(_, body)| body).unwrap_or(inner).trim();
    }
    let cleaned = text
        .trim_start_matches(|c| c == '"' || c == '\'')
        .trim_end_matches(|c| c == '"' || c == '\'')
        .trim();
    if cleaned.is_empty() {
        return Err(SinkError::EmptyResponse);
    }
    Ok(cleaned.to_string())
}
