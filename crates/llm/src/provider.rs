use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Chat message roles, OpenAI-compatible on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A tool advertised to a tool-calling model, JSON-schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// The core provider contract: one generate call. A scoped handle —
/// `close` is guaranteed to be called once by the owning agent.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, ctx: &CancellationToken, messages: &[ChatMessage])
        -> Result<ChatMessage>;

    fn model_name(&self) -> &str;

    /// Downcast check for tool-calling support; base models return `None`
    /// and callers take the fallback path.
    fn as_tool_calling(&self) -> Option<&dyn ToolCallingModel> {
        None
    }

    /// Release provider resources. Idempotent.
    async fn close(&self) {}
}

/// Extension for models that accept a tool schema list and can return
/// tool-call messages.
#[async_trait]
pub trait ToolCallingModel: ChatModel {
    async fn generate_with_tools(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage>;
}

/// Fixed-dimension text embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, ctx: &CancellationToken, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Advertised context window by model name; drives budget construction.
/// Unknown models get a conservative default.
pub fn max_input_tokens(model: &str) -> usize {
    let lowered = model.to_lowercase();
    const TABLE: &[(&str, usize)] = &[
        ("gpt-4o", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-4", 8_192),
        ("gpt-3.5", 16_385),
        ("claude-3", 200_000),
        ("claude-sonnet", 200_000),
        ("claude-opus", 200_000),
        ("gemini-1.5", 1_000_000),
        ("llama3", 8_192),
        ("qwen", 32_768),
        ("mistral", 32_768),
    ];
    for (prefix, tokens) in TABLE {
        if lowered.starts_with(prefix) {
            return *tokens;
        }
    }
    16_384
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_table_matches_by_prefix() {
        assert_eq!(max_input_tokens("gpt-4o-mini"), 128_000);
        assert_eq!(max_input_tokens("GPT-4"), 8_192);
        assert_eq!(max_input_tokens("some-unknown-model"), 16_384);
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = ChatMessage::tool_result("call_1", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }
}
