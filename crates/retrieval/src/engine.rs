//! The hybrid retrieval engine. Stages run sequentially on a single request;
//! optional stages (rewrite, rerank, expansion) degrade silently.

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::expand;
use crate::rerank::{apply_rerank, Reranker};
use crate::rewrite::rewrite_query;
use ndarray::ArrayView1;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskwing_llm::{ChatModel, Embedder};
use taskwing_store::{KnowledgeStore, Node};
use tokio_util::sync::CancellationToken;

/// Query prefixes resolved as direct ID lookups before any search.
const EXACT_ID_PREFIXES: &[&str] = &["task-", "node-", "plan-"];

/// Content marker letting a `pattern` node satisfy `type=workflow` queries.
pub const WORKFLOW_MARKER: &str = "[workflow]";

/// Headroom multiplier applied to the candidate limit under a workspace
/// filter, so post-filter results can still fill the limit.
const WORKSPACE_HEADROOM: usize = 3;

#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
    pub fts_score: f64,
    pub vector_score: f64,
    pub rerank_score: Option<f64>,
    /// Parent node id when this entry joined via graph expansion.
    pub expanded_from: Option<String>,
    pub is_exact: bool,
}

impl ScoredNode {
    pub fn primary(node: Node, score: f64) -> Self {
        Self {
            node,
            score,
            fts_score: 0.0,
            vector_score: 0.0,
            rerank_score: None,
            expanded_from: None,
            is_exact: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub node_type: Option<String>,
    pub workspace: Option<String>,
    /// Accept `root`/empty-tagged nodes through the workspace filter.
    pub include_root: bool,
    pub debug: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            node_type: None,
            workspace: None,
            include_root: true,
            debug: false,
        }
    }
}

/// Per-stage timings, returned in debug mode.
#[derive(Debug, Default)]
pub struct DebugReport {
    pub stages: Vec<(String, Duration)>,
}

#[derive(Debug, Default)]
pub struct SearchResults {
    pub nodes: Vec<ScoredNode>,
    pub debug: Option<DebugReport>,
}

pub struct RetrievalEngine {
    store: Arc<KnowledgeStore>,
    config: RetrievalConfig,
    embedder: Option<Arc<dyn Embedder>>,
    rewrite_model: Option<Arc<dyn ChatModel>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<KnowledgeStore>, config: RetrievalConfig) -> Self {
        Self {
            store,
            config: config.sanitized(),
            embedder: None,
            rewrite_model: None,
            reranker: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_rewrite_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.rewrite_model = Some(model);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub async fn search(
        &self,
        ctx: &CancellationToken,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SearchResults> {
        let mut report = DebugReport::default();
        let query = query.trim();

        // Exact-ID shortcut.
        let exact = if is_exact_id(query) {
            self.store.get(query)?.map(|node| {
                let mut scored = ScoredNode::primary(node, 1.0);
                scored.is_exact = true;
                scored
            })
        } else {
            None
        };

        // Stage 1: optional query rewrite, never fatal.
        let stage = Instant::now();
        let effective_query = match (&self.rewrite_model, self.config.query_rewrite_enabled) {
            (Some(model), true) => rewrite_query(ctx, model, query).await,
            _ => query.to_string(),
        };
        report.stages.push(("rewrite".into(), stage.elapsed()));

        // Stage 2: recall with workspace headroom.
        let stage = Instant::now();
        let candidate_limit = self.config.rerank_top_k
            * if opts.workspace.is_some() {
                WORKSPACE_HEADROOM
            } else {
                1
            };
        let mut candidates = self.recall(ctx, &effective_query, candidate_limit).await?;
        report.stages.push(("recall".into(), stage.elapsed()));

        // Stage 3: type filter.
        if let Some(node_type) = &opts.node_type {
            candidates.retain(|c| type_matches(&c.node, node_type));
        }

        // Stage 4: combined-score threshold.
        candidates.retain(|c| c.score >= self.config.min_result_score_threshold);
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(candidate_limit);

        // Stage 5: optional rerank under its intrinsic soft timeout.
        if self.config.reranking_enabled {
            if let Some(reranker) = &self.reranker {
                let stage = Instant::now();
                let top_k = self.config.rerank_top_k.min(candidates.len());
                apply_rerank(ctx, reranker.as_ref(), &effective_query, &mut candidates[..top_k])
                    .await;
                report.stages.push(("rerank".into(), stage.elapsed()));
            }
        }

        // Stage 6: depth-1 graph expansion from the top results.
        if self.config.graph_expansion_enabled {
            let stage = Instant::now();
            match expand::expand(&self.store, &candidates, &self.config) {
                Ok(expanded) => candidates.extend(expanded),
                Err(e) => log::warn!("graph expansion failed, continuing without it: {e}"),
            }
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            report.stages.push(("expand".into(), stage.elapsed()));
        }

        // Exact hit goes first; drop any duplicate of it from the ranking.
        if let Some(exact) = exact {
            candidates.retain(|c| c.node.id != exact.node.id);
            candidates.insert(0, exact);
        }

        // Workspace filter, after ranking.
        if let Some(workspace) = opts.workspace.as_deref().filter(|w| !w.is_empty()) {
            candidates.retain(|c| {
                c.node.workspace == workspace
                    || (opts.include_root
                        && (c.node.workspace == "root" || c.node.workspace.is_empty()))
            });
        }

        let nodes = final_select(
            candidates,
            opts.limit,
            self.config.graph_expansion_reserved_slots,
        );
        Ok(SearchResults {
            nodes,
            debug: opts.debug.then_some(report),
        })
    }

    /// Lexical and vector recall summed per node. One embedding call per
    /// query; embedding-bearing nodes are iterated in a single pass.
    async fn recall(
        &self,
        ctx: &CancellationToken,
        query: &str,
        candidate_limit: usize,
    ) -> Result<Vec<ScoredNode>> {
        let mut by_id: HashMap<String, ScoredNode> = HashMap::new();

        for (node, rank) in self.store.search_fts(query, candidate_limit)? {
            let fts_score = fts_rank_score(rank) * self.config.fts_weight;
            let entry = by_id
                .entry(node.id.clone())
                .or_insert_with(|| ScoredNode::primary(node, 0.0));
            entry.fts_score = fts_score;
            entry.score += fts_score;
        }

        if let Some(embedder) = &self.embedder {
            match embedder.embed(ctx, query).await {
                Ok(query_vec) => {
                    for (node, vec) in self.store.list_with_embeddings()? {
                        let similarity = cosine(&query_vec, &vec);
                        if similarity < self.config.vector_score_threshold {
                            continue;
                        }
                        let vector_score = similarity * self.config.vector_weight;
                        let entry = by_id
                            .entry(node.id.clone())
                            .or_insert_with(|| ScoredNode::primary(node, 0.0));
                        entry.vector_score = vector_score;
                        entry.score += vector_score;
                    }
                }
                Err(e) => log::warn!("query embedding failed, lexical-only recall: {e}"),
            }
        }

        Ok(by_id.into_values().collect())
    }
}

/// Map a raw BM25 rank `r` (negative, more negative = better) into `[0.1, 1]`.
pub fn fts_rank_score(rank: f64) -> f64 {
    (-rank / 10.0).clamp(0.1, 1.0)
}

pub fn is_exact_id(query: &str) -> bool {
    !query.contains(char::is_whitespace)
        && EXACT_ID_PREFIXES.iter().any(|p| query.starts_with(p))
}

fn type_matches(node: &Node, wanted: &str) -> bool {
    if node.node_type == wanted {
        return true;
    }
    // Dual-typed pattern nodes may satisfy workflow queries.
    wanted == "workflow" && node.node_type == "pattern" && node.content.contains(WORKFLOW_MARKER)
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let av = ArrayView1::from(a);
    let bv = ArrayView1::from(b);
    let dot = av.dot(&bv) as f64;
    let norm = (av.dot(&av) as f64).sqrt() * (bv.dot(&bv) as f64).sqrt();
    if norm == 0.0 {
        0.0
    } else {
        dot / norm
    }
}

/// Apply the final limit, reserving up to `reserved_slots` for expanded
/// neighbors; remaining slots go to primary results. Final order is by score.
fn final_select(candidates: Vec<ScoredNode>, limit: usize, reserved_slots: usize) -> Vec<ScoredNode> {
    let (expanded, primary): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.expanded_from.is_some());

    let reserved = reserved_slots.min(expanded.len()).min(limit);
    let mut selected: Vec<ScoredNode> = primary.into_iter().take(limit - reserved).collect();
    selected.extend(expanded.into_iter().take(reserved));

    // Backfill with nothing: fewer results than the limit is fine.
    selected.sort_by(|a, b| {
        b.is_exact
            .cmp(&a.is_exact)
            .then(b.score.total_cmp(&a.score))
    });
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskwing_llm::testing::HashEmbedder;
    use taskwing_protocol::{Evidence, Finding, FindingKind};

    fn seed(store: &KnowledgeStore, title: &str, desc: &str, workspace: &str) -> String {
        let mut f = Finding::new(FindingKind::Feature, title, desc);
        f.evidence.push(Evidence::file_span("a.rs", 1, 2, "x").unwrap());
        f.source_agent = "code".into();
        store
            .upsert_by_summary(&taskwing_store::Node::from_finding(&f, workspace))
            .unwrap()
    }

    fn engine(store: Arc<KnowledgeStore>) -> RetrievalEngine {
        RetrievalEngine::new(store, RetrievalConfig::default())
    }

    #[test]
    fn bm25_rank_maps_into_unit_range() {
        assert_eq!(fts_rank_score(-5.0), 0.5);
        assert_eq!(fts_rank_score(-0.2), 0.1);
        assert_eq!(fts_rank_score(-50.0), 1.0);
        // a pathological positive rank still lands on the floor
        assert_eq!(fts_rank_score(3.0), 0.1);
    }

    #[test]
    fn exact_id_prefixes_are_recognized() {
        assert!(is_exact_id("node-1a2b3c4d"));
        assert!(is_exact_id("task-42"));
        assert!(is_exact_id("plan-7"));
        assert!(!is_exact_id("node about retries"));
        assert!(!is_exact_id("retry budget"));
    }

    #[tokio::test]
    async fn lexical_search_finds_seeded_nodes() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        seed(&store, "Retry backoff policy", "Exponential delays with jitter", "root");
        seed(&store, "Billing exporter", "Nightly invoice batch", "root");

        let results = engine(store)
            .search(&CancellationToken::new(), "retry backoff", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(results.nodes.len(), 1);
        assert_eq!(results.nodes[0].node.title, "Retry backoff policy");
        assert!(results.nodes[0].fts_score >= 0.1);
    }

    #[tokio::test]
    async fn vector_recall_adds_semantic_matches() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let id = seed(&store, "Exponential delays", "retry backoff jitter waits", "root");
        let embedder = Arc::new(HashEmbedder::new(64));
        let vec = embedder
            .embed(&CancellationToken::new(), "retry backoff jitter waits")
            .await
            .unwrap();
        store.set_embedding(&id, &vec).unwrap();

        let engine = engine(store).with_embedder(embedder);
        let results = engine
            .search(
                &CancellationToken::new(),
                "retry backoff jitter waits",
                &SearchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(results.nodes.len(), 1);
        assert!(results.nodes[0].vector_score > 0.0);
    }

    #[tokio::test]
    async fn exact_id_lookup_wins_with_score_one() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let id = seed(&store, "Budget cap", "Caps tokens", "root");

        let results = engine(store)
            .search(&CancellationToken::new(), &id, &SearchOptions::default())
            .await
            .unwrap();
        assert!(results.nodes[0].is_exact);
        assert_eq!(results.nodes[0].score, 1.0);
    }

    #[tokio::test]
    async fn workspace_filter_drops_foreign_nodes() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        seed(&store, "Shared auth helper", "auth tokens", "services/auth");
        seed(&store, "Auth token docs", "auth tokens", "root");

        let opts = SearchOptions {
            workspace: Some("services/auth".into()),
            include_root: false,
            ..Default::default()
        };
        let results = engine(store.clone())
            .search(&CancellationToken::new(), "auth tokens", &opts)
            .await
            .unwrap();
        assert!(results.nodes.iter().all(|n| n.node.workspace == "services/auth"));

        let opts = SearchOptions {
            workspace: Some("services/auth".into()),
            include_root: true,
            ..Default::default()
        };
        let results = engine(store)
            .search(&CancellationToken::new(), "auth tokens", &opts)
            .await
            .unwrap();
        assert_eq!(results.nodes.len(), 2);
    }

    #[tokio::test]
    async fn empty_workspace_filter_is_identity() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        seed(&store, "Shared auth helper", "auth tokens", "services/auth");

        let opts = SearchOptions {
            workspace: Some(String::new()),
            include_root: false,
            ..Default::default()
        };
        let results = engine(store)
            .search(&CancellationToken::new(), "auth tokens", &opts)
            .await
            .unwrap();
        assert_eq!(results.nodes.len(), 1);
    }

    #[tokio::test]
    async fn type_filter_allows_marked_patterns_for_workflow() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let mut f = Finding::new(
            FindingKind::Pattern,
            "Release checklist",
            format!("{WORKFLOW_MARKER} tag, build, publish"),
        );
        f.evidence.push(Evidence::file_span("RELEASE.md", 1, 4, "steps").unwrap());
        f.source_agent = "docs".into();
        store
            .upsert_by_summary(&taskwing_store::Node::from_finding(&f, "root"))
            .unwrap();
        seed(&store, "Plain release notes", "release checklist text", "root");

        let opts = SearchOptions {
            node_type: Some("workflow".into()),
            ..Default::default()
        };
        let results = engine(store)
            .search(&CancellationToken::new(), "release checklist", &opts)
            .await
            .unwrap();
        assert_eq!(results.nodes.len(), 1);
        assert_eq!(results.nodes[0].node.node_type, "pattern");
    }

    #[tokio::test]
    async fn expanded_nodes_use_reserved_slots() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let parent = seed(&store, "Retry chain runtime", "retry backoff chain", "root");
        let neighbor = seed(&store, "Error classifier", "classifies provider errors", "root");
        store
            .link(&parent, &neighbor, "uses", 0.9, serde_json::json!({}))
            .unwrap();

        let config = RetrievalConfig {
            min_result_score_threshold: 0.01,
            ..Default::default()
        };
        let results = RetrievalEngine::new(store, config)
            .search(
                &CancellationToken::new(),
                "retry backoff chain",
                &SearchOptions::default(),
            )
            .await
            .unwrap();
        let expanded: Vec<_> = results.nodes.iter().filter(|n| n.expanded_from.is_some()).collect();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].node.title, "Error classifier");
    }

    #[tokio::test]
    async fn debug_mode_reports_stage_timings() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        seed(&store, "Budget cap", "Caps tokens", "root");
        let opts = SearchOptions {
            debug: true,
            ..Default::default()
        };
        let results = engine(store)
            .search(&CancellationToken::new(), "budget", &opts)
            .await
            .unwrap();
        let report = results.debug.unwrap();
        let names: Vec<&str> = report.stages.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"recall"));
    }
}
