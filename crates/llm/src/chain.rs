use crate::classify::{classify, is_retryable, ErrorClass};
use crate::error::{LlmError, Result};
use crate::parse::parse_typed;
use crate::provider::{ChatMessage, ChatModel};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Minimum post-jitter delay between attempts.
const MIN_BACKOFF: Duration = Duration::from_millis(100);

/// Retry surface of the chain (§ config: `[chain]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            jitter_factor: 0.5,
        }
    }
}

/// Result of a successful chain invocation.
#[derive(Debug)]
pub struct ChainOutcome<T> {
    pub parsed: T,
    pub raw: String,
    pub duration: Duration,
    pub attempts: u32,
}

/// The invariant LLM interaction pattern: map → template → model → JSON
/// parser → typed output, with classified retries.
///
/// Within one invocation the stages are strictly sequential; retries restart
/// from the model call with the same rendered prompt.
pub struct Chain {
    name: String,
    template: String,
    model: Arc<dyn ChatModel>,
    config: ChainConfig,
}

impl Chain {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        model: Arc<dyn ChatModel>,
        config: ChainConfig,
    ) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            model,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    /// Substitute `{key}` placeholders. Unknown placeholders are left in
    /// place; prompts mention literal braces rarely enough that strictness
    /// here costs more than it catches.
    pub fn render(&self, vars: &HashMap<String, String>) -> String {
        let mut prompt = self.template.clone();
        for (key, value) in vars {
            prompt = prompt.replace(&format!("{{{key}}}"), value);
        }
        prompt
    }

    /// Invoke the chain: render, call the model, parse into `T`. Transient
    /// failures (timeout, rate limit, JSON parse, network) are retried up to
    /// `max_retries` attempts with exponential, jittered back-off.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        vars: &HashMap<String, String>,
    ) -> Result<ChainOutcome<T>> {
        let prompt = self.render(vars);
        let messages = [ChatMessage::user(prompt)];
        let started = Instant::now();
        let max_attempts = self.config.max_retries.max(1);

        let mut last_err = LlmError::Provider("chain invoked zero times".into());
        for attempt in 1..=max_attempts {
            if ctx.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let result = match self.model.generate(ctx, &messages).await {
                Ok(reply) => parse_typed::<T>(&reply.content).map(|parsed| (parsed, reply.content)),
                Err(e) => Err(e),
            };

            match result {
                Ok((parsed, raw)) => {
                    return Ok(ChainOutcome {
                        parsed,
                        raw,
                        duration: started.elapsed(),
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    let class = classify(&err);
                    if class == ErrorClass::Cancelled {
                        return Err(err);
                    }
                    if !is_retryable(class) || attempt == max_attempts {
                        log::warn!(
                            "chain '{}' failed on attempt {attempt}/{max_attempts}: {err}",
                            self.name
                        );
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    log::debug!(
                        "chain '{}' attempt {attempt}/{max_attempts} hit {class:?}, retrying in {delay:?}",
                        self.name
                    );
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(LlmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// `base · 2^(attempt−1)` clamped to the max delay, jittered by
    /// ±`jitter_factor`, floored at 100 ms.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay_ms.max(1);
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(20));
        let clamped = exp.min(self.config.retry_max_delay_ms);
        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        let jittered = (clamped as f64 * factor) as u64;
        Duration::from_millis(jittered).max(MIN_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Reply {
        ok: bool,
    }

    fn fast_config() -> ChainConfig {
        ChainConfig {
            max_retries: 4,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let model = Arc::new(ScriptedModel::replying(vec![Ok(r#"{"ok": true}"#.into())]));
        let chain = Chain::new("t", "say {word}", model.clone(), fast_config());
        let out: ChainOutcome<Reply> = chain
            .invoke(&CancellationToken::new(), &HashMap::from([("word".into(), "hi".into())]))
            .await
            .unwrap();
        assert!(out.parsed.ok);
        assert_eq!(out.attempts, 1);
        assert_eq!(model.prompts()[0], "say hi");
    }

    #[tokio::test]
    async fn retries_rate_limit_until_valid_json() {
        // Three 429s then success: total attempts = 4.
        let model = Arc::new(ScriptedModel::replying(vec![
            Err(LlmError::Provider("429 Too Many Requests".into())),
            Err(LlmError::Provider("429 Too Many Requests".into())),
            Err(LlmError::Provider("429 Too Many Requests".into())),
            Ok(r#"{"ok": true}"#.into()),
        ]));
        let chain = Chain::new("t", "x", model.clone(), fast_config());
        let out: ChainOutcome<Reply> =
            chain.invoke(&CancellationToken::new(), &HashMap::new()).await.unwrap();
        assert_eq!(out.attempts, 4);
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn non_retryable_returns_immediately() {
        let model = Arc::new(ScriptedModel::replying(vec![
            Err(LlmError::Auth("invalid api key".into())),
            Ok(r#"{"ok": true}"#.into()),
        ]));
        let chain = Chain::new("t", "x", model.clone(), fast_config());
        let err = chain
            .invoke::<Reply>(&CancellationToken::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn bad_json_is_retried_then_gives_up() {
        let model = Arc::new(ScriptedModel::replying(vec![
            Ok("not json".into()),
            Ok("still not json".into()),
            Ok("nope".into()),
            Ok("nah".into()),
        ]));
        let chain = Chain::new("t", "x", model.clone(), fast_config());
        let err = chain
            .invoke::<Reply>(&CancellationToken::new(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::JsonParse(_)));
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_cancelled() {
        let model = Arc::new(ScriptedModel::replying(vec![
            Err(LlmError::Provider("429".into())),
            Ok(r#"{"ok": true}"#.into()),
        ]));
        let config = ChainConfig {
            retry_base_delay_ms: 60_000,
            ..fast_config()
        };
        let chain = Chain::new("t", "x", model, config);
        let ctx = CancellationToken::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let err = chain.invoke::<Reply>(&ctx, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }

    #[tokio::test]
    async fn backoff_respects_caps_and_floor() {
        let model = Arc::new(ScriptedModel::replying(vec![]));
        let chain = Chain::new(
            "t",
            "x",
            model,
            ChainConfig {
                max_retries: 10,
                retry_base_delay_ms: 500,
                retry_max_delay_ms: 30_000,
                jitter_factor: 0.5,
            },
        );
        for attempt in 1..=10 {
            let delay = chain.backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(100), "floor violated");
            assert!(delay <= Duration::from_millis(45_000), "cap+jitter violated");
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ChainConfig = toml_from_str("max_retries = 2");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_max_delay_ms, 30_000);
    }

    fn toml_from_str(s: &str) -> ChainConfig {
        // serde_json round-trip keeps the dev-dependency surface small
        let value: serde_json::Value = s
            .lines()
            .filter_map(|l| l.split_once(" = "))
            .map(|(k, v)| (k.to_string(), serde_json::json!(v.parse::<u64>().unwrap())))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();
        serde_json::from_value(value).unwrap()
    }
}
