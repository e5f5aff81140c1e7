//! Scripted provider doubles for tests in this crate and downstream crates.

use crate::error::{LlmError, Result};
use crate::provider::{ChatMessage, ChatModel, Embedder, ToolCallingModel, ToolSpec};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A chat model that replays a fixed script of replies or errors.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedModel {
    pub fn replying(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Every call (up to a generous bound) succeeds with the same body.
    pub fn always(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::replying((0..64).map(|_| Ok(reply.clone())).collect())
    }

    /// Prompts observed so far (last user message of each call).
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn generate(
        &self,
        ctx: &CancellationToken,
        messages: &[ChatMessage],
    ) -> Result<ChatMessage> {
        if ctx.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(ChatMessage::assistant(reply)),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::Provider("scripted model exhausted".into())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A tool-calling model that replays full [`ChatMessage`]s, tool calls
/// included.
pub struct ScriptedToolModel {
    script: Mutex<VecDeque<Result<ChatMessage>>>,
    calls: AtomicUsize,
}

impl ScriptedToolModel {
    pub fn replying(script: Vec<Result<ChatMessage>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<ChatMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(r) => r,
            None => Err(LlmError::Provider("scripted tool model exhausted".into())),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedToolModel {
    async fn generate(
        &self,
        ctx: &CancellationToken,
        _messages: &[ChatMessage],
    ) -> Result<ChatMessage> {
        if ctx.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.next()
    }

    fn model_name(&self) -> &str {
        "scripted-tools"
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingModel> {
        Some(self)
    }
}

#[async_trait]
impl ToolCallingModel for ScriptedToolModel {
    async fn generate_with_tools(
        &self,
        ctx: &CancellationToken,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatMessage> {
        if ctx.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.next()
    }
}

/// Deterministic hash-bucket embedder; same text, same vector.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, ctx: &CancellationToken, text: &str) -> Result<Vec<f32>> {
        if ctx.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let lowered = token.to_lowercase();
            let mut hash: u64 = 1469598103934665603;
            for b in lowered.bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
