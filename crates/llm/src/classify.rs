use crate::error::LlmError;

/// Canonical error classes the retry policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Timeout,
    RateLimit,
    JsonParse,
    Network,
    Auth,
    InvalidRequest,
    ContentPolicy,
    ModelNotFound,
    Cancelled,
    Unknown,
}

const TIMEOUT_SIGNATURES: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const RATE_LIMIT_SIGNATURES: &[&str] = &["rate limit", "too many requests", "429", "quota"];
const NETWORK_SIGNATURES: &[&str] = &[
    "connection refused",
    "connection reset",
    "broken pipe",
    "dns",
    "network",
    "unreachable",
    "502",
    "503",
    "504",
];
const AUTH_SIGNATURES: &[&str] = &["unauthorized", "invalid api key", "authentication", "401"];
const CONTENT_POLICY_SIGNATURES: &[&str] = &["content policy", "content_filter", "safety"];
const MODEL_NOT_FOUND_SIGNATURES: &[&str] = &["model not found", "does not exist", "unknown model"];

/// Classify an error: typed equality where possible, case-insensitive
/// substring match against known vendor signatures otherwise. Deterministic
/// for a given message.
pub fn classify(err: &LlmError) -> ErrorClass {
    match err {
        LlmError::Timeout => ErrorClass::Timeout,
        LlmError::RateLimit(_) => ErrorClass::RateLimit,
        LlmError::JsonParse(_) => ErrorClass::JsonParse,
        LlmError::Auth(_) => ErrorClass::Auth,
        LlmError::InvalidRequest(_) => ErrorClass::InvalidRequest,
        LlmError::ContentPolicy(_) => ErrorClass::ContentPolicy,
        LlmError::ModelNotFound(_) => ErrorClass::ModelNotFound,
        LlmError::Cancelled => ErrorClass::Cancelled,
        LlmError::Template(_) => ErrorClass::Unknown,
        LlmError::Network(msg) | LlmError::Provider(msg) => classify_message(msg),
    }
}

fn classify_message(msg: &str) -> ErrorClass {
    let lowered = msg.to_lowercase();
    let matches = |sigs: &[&str]| sigs.iter().any(|s| lowered.contains(s));
    // Order matters: timeout signatures are checked before the generic
    // network bucket ("gateway timeout" is a timeout, not just a 504).
    if matches(TIMEOUT_SIGNATURES) {
        ErrorClass::Timeout
    } else if matches(RATE_LIMIT_SIGNATURES) {
        ErrorClass::RateLimit
    } else if matches(AUTH_SIGNATURES) {
        ErrorClass::Auth
    } else if matches(CONTENT_POLICY_SIGNATURES) {
        ErrorClass::ContentPolicy
    } else if matches(MODEL_NOT_FOUND_SIGNATURES) {
        ErrorClass::ModelNotFound
    } else if matches(NETWORK_SIGNATURES) {
        ErrorClass::Network
    } else {
        ErrorClass::Unknown
    }
}

/// Retryable iff transient: timeout, rate limit, JSON parse, network.
pub fn is_retryable(class: ErrorClass) -> bool {
    matches!(
        class,
        ErrorClass::Timeout | ErrorClass::RateLimit | ErrorClass::JsonParse | ErrorClass::Network
    )
}
