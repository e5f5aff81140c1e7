//! OpenAI-compatible HTTP provider.
//!
//! One client covers chat, tool-calling chat, and embeddings. Status codes
//! map onto the typed error taxonomy so the chain's classifier can work by
//! typed equality instead of scraping messages.

use crate::error::{LlmError, Result};
use crate::provider::{
    ChatMessage, ChatModel, Embedder, Role, ToolCall, ToolCallingModel, ToolSpec,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            request_timeout_secs: 120,
        }
    }
}

pub struct HttpChatModel {
    client: reqwest::Client,
    config: HttpConfig,
}

impl HttpChatModel {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn chat(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ChatMessage> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools.map(|specs| specs.iter().map(WireTool::from).collect()),
        };
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(LlmError::Cancelled),
            r = request => r.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::Provider(format!("malformed provider response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Provider("provider returned no choices".into()))?;
        Ok(choice.message.into_chat_message()?)
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn generate(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
    ) -> Result<ChatMessage> {
        self.chat(ctx, messages, None).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingModel> {
        Some(self)
    }

    async fn close(&self) {
        // reqwest's pool drains on drop; nothing held beyond the client.
        log::debug!("closing HTTP model handle for {}", self.config.model);
    }
}

#[async_trait]
impl ToolCallingModel for HttpChatModel {
    async fn generate_with_tools(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage> {
        self.chat(ctx, messages, Some(tools)).await
    }
}

#[async_trait]
impl Embedder for HttpChatModel {
    async fn embed(&self, ctx: &CancellationToken, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": text,
        });
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(LlmError::Cancelled),
            r = request => r.map_err(map_reqwest_error)?,
        };
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(map_status(status, &text));
        }
        let parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::Provider(format!("malformed embedding response: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::Provider("provider returned no embedding".into()))
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else if e.is_connect() || e.is_request() {
        LlmError::Network(e.to_string())
    } else {
        LlmError::Provider(e.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> LlmError {
    let detail = body.chars().take(300).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimit(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth(detail),
        StatusCode::NOT_FOUND => LlmError::ModelNotFound(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout,
        StatusCode::BAD_REQUEST => {
            if detail.to_lowercase().contains("content") && detail.to_lowercase().contains("policy")
            {
                LlmError::ContentPolicy(detail)
            } else {
                LlmError::InvalidRequest(detail)
            }
        }
        s if s.is_server_error() => LlmError::Network(format!("{s}: {detail}")),
        s => LlmError::Provider(format!("{s}: {detail}")),
    }
}

// --- wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: Some(msg.content.clone()),
            tool_calls: if msg.tool_calls.is_empty() {
                None
            } else {
                Some(msg.tool_calls.iter().map(WireToolCall::from).collect())
            },
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl WireMessage {
    fn into_chat_message(self) -> Result<ChatMessage> {
        let tool_calls = self
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();
        Ok(ChatMessage {
            role: self.role,
            content: self.content.unwrap_or_default(),
            tool_calls,
            tool_call_id: self.tool_call_id,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

impl From<&ToolCall> for WireToolCall {
    fn from(tc: &ToolCall) -> Self {
        Self {
            id: tc.id.clone(),
            kind: function_type(),
            function: WireFunctionCall {
                name: tc.name.clone(),
                arguments: tc.arguments.to_string(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: function_type(),
            function: WireFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            LlmError::RateLimit(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, "bad key"),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "no such model"),
            LlmError::ModelNotFound(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "upstream sad"),
            LlmError::Network(_)
        ));
    }

    #[test]
    fn bad_request_distinguishes_content_policy() {
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "violates content policy"),
            LlmError::ContentPolicy(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "missing field"),
            LlmError::InvalidRequest(_)
        ));
    }

    #[test]
    fn tool_call_arguments_parse_from_string_form() {
        let wire = WireMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![WireToolCall {
                id: "call_1".into(),
                kind: "function".into(),
                function: WireFunctionCall {
                    name: "read_file".into(),
                    arguments: r#"{"path": "src/main.rs"}"#.into(),
                },
            }]),
            tool_call_id: None,
        };
        let msg = wire.into_chat_message().unwrap();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].arguments["path"], "src/main.rs");
    }
}
