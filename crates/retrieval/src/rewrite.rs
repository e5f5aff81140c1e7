//! Optional query rewrite: one lightweight LLM call normalizing typos and
//! redundancy. Never fatal; any failure returns the original query.

use std::sync::Arc;
use taskwing_llm::{ChatMessage, ChatModel};
use tokio_util::sync::CancellationToken;

const REWRITE_PROMPT: &str = "Rewrite this code-search query: fix typos, remove filler words, \
keep all technical terms. Reply with the rewritten query only, no quotes, no preamble.\n\nQuery: ";

pub async fn rewrite_query(
    ctx: &CancellationToken,
    model: &Arc<dyn ChatModel>,
    query: &str,
) -> String {
    let messages = [ChatMessage::user(format!("{REWRITE_PROMPT}{query}"))];
    let reply = match model.generate(ctx, &messages).await {
        Ok(reply) => reply.content,
        Err(e) => {
            log::debug!("query rewrite failed, keeping original: {e}");
            return query.to_string();
        }
    };
    match sanitize(&reply, query) {
        Some(rewritten) => rewritten,
        None => query.to_string(),
    }
}

/// Strip preambles and quotes; reject empty output or anything that ballooned
/// past 3x the input length.
fn sanitize(reply: &str, original: &str) -> Option<String> {
    let mut cleaned = reply.trim();
    for prefix in ["Rewritten query:", "Query:", "Rewritten:"] {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest.trim();
        }
    }
    let cleaned = cleaned.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim();
    if cleaned.is_empty() || cleaned.len() > original.len().max(1) * 3 {
        return None;
    }
    Some(cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskwing_llm::testing::ScriptedModel;
    use taskwing_llm::LlmError;

    #[tokio::test]
    async fn strips_preamble_and_quotes() {
        let model: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::replying(vec![Ok("Rewritten query: \"jwt auth\"".into())]));
        let out = rewrite_query(&CancellationToken::new(), &model, "jwt authentification").await;
        assert_eq!(out, "jwt auth");
    }

    #[tokio::test]
    async fn empty_reply_keeps_original() {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::replying(vec![Ok("  ".into())]));
        let out = rewrite_query(&CancellationToken::new(), &model, "retry logic").await;
        assert_eq!(out, "retry logic");
    }

    #[tokio::test]
    async fn ballooned_reply_keeps_original() {
        let model: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::replying(vec![Ok("x".repeat(200))]));
        let out = rewrite_query(&CancellationToken::new(), &model, "auth").await;
        assert_eq!(out, "auth");
    }

    #[tokio::test]
    async fn provider_error_keeps_original() {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::replying(vec![Err(
            LlmError::Network("down".into()),
        )]));
        let out = rewrite_query(&CancellationToken::new(), &model, "budget cap").await;
        assert_eq!(out, "budget cap");
    }
}
