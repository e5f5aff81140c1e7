//! LLM provider contract and the deterministic chain runtime.
//!
//! The rest of the workspace talks to models through two small traits
//! ([`ChatModel`], [`Embedder`]) and one pipeline: [`Chain`], which templates
//! a prompt, invokes the model, extracts JSON, and retries transient failures
//! with classified exponential back-off.

pub mod chain;
pub mod classify;
pub mod error;
pub mod http;
pub mod parse;
pub mod provider;
pub mod testing;

pub use chain::{Chain, ChainConfig, ChainOutcome};
pub use classify::{classify, is_retryable, ErrorClass};
pub use error::{LlmError, Result};
pub use http::{HttpChatModel, HttpConfig};
pub use parse::{extract_json, parse_typed};
pub use provider::{
    max_input_tokens, ChatMessage, ChatModel, Embedder, Role, ToolCall, ToolCallingModel, ToolSpec,
};
