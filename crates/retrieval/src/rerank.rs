//! Optional rerank stage. The engine calls whatever [`Reranker`] it is
//! given under a 5 s soft timeout; timeout or failure keeps the previous
//! ordering.

use crate::engine::ScoredNode;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const RERANK_TIMEOUT: Duration = Duration::from_secs(5);

/// Cross-encoder style scoring of `(query, text)` pairs. Higher is better.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(
        &self,
        ctx: &CancellationToken,
        query: &str,
        texts: &[String],
    ) -> taskwing_llm::Result<Vec<f64>>;
}

/// Re-order candidates in place by reranker score. Silent fallback: on
/// timeout, cancellation, or scorer failure the input ordering survives.
pub async fn apply_rerank(
    ctx: &CancellationToken,
    reranker: &dyn Reranker,
    query: &str,
    candidates: &mut [ScoredNode],
) {
    if candidates.is_empty() {
        return;
    }
    let texts: Vec<String> = candidates.iter().map(|c| c.node.text()).collect();
    let scores = match tokio::time::timeout(RERANK_TIMEOUT, reranker.score(ctx, query, &texts)).await
    {
        Ok(Ok(scores)) if scores.len() == candidates.len() => scores,
        Ok(Ok(_)) => {
            log::warn!("reranker returned a mismatched score count, keeping hybrid order");
            return;
        }
        Ok(Err(e)) => {
            log::warn!("rerank failed, keeping hybrid order: {e}");
            return;
        }
        Err(_) => {
            log::warn!("rerank timed out after {RERANK_TIMEOUT:?}, keeping hybrid order");
            return;
        }
    };
    for (candidate, score) in candidates.iter_mut().zip(&scores) {
        candidate.rerank_score = Some(*score);
    }
    candidates.sort_by(|a, b| {
        b.rerank_score
            .unwrap_or(b.score)
            .total_cmp(&a.rerank_score.unwrap_or(a.score))
    });
}

/// Default reranker: token-overlap ratio between query and candidate text.
/// Cheap, deterministic, and good enough to promote exact phrasing matches.
#[derive(Default)]
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(
        &self,
        _ctx: &CancellationToken,
        query: &str,
        texts: &[String],
    ) -> taskwing_llm::Result<Vec<f64>> {
        let query_tokens = tokens(query);
        Ok(texts
            .iter()
            .map(|text| {
                if query_tokens.is_empty() {
                    return 0.0;
                }
                let text_tokens = tokens(text);
                let overlap = query_tokens.intersection(&text_tokens).count();
                overlap as f64 / query_tokens.len() as f64
            })
            .collect())
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}
