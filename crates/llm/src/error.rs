use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors from model providers and the chain runtime.
///
/// Typed variants exist for the classes the retry policy cares about; vendor
/// errors that arrive as plain text land in `Provider` and are classified by
/// message signature.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse model output as JSON: {0}")]
    JsonParse(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("template error: {0}")]
    Template(String),

    #[error("provider error: {0}")]
    Provider(String),
}
