use serde::Deserialize;

/// Tuning surface of the retrieval engine (config section `[retrieval]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Relative contribution of the lexical (FTS) signal.
    pub fts_weight: f64,
    /// Relative contribution of the vector signal.
    pub vector_weight: f64,
    /// Per-node cosine cutoff for vector candidates.
    pub vector_score_threshold: f64,
    /// Combined-score cutoff applied before rerank and expansion.
    pub min_result_score_threshold: f64,
    pub query_rewrite_enabled: bool,
    pub reranking_enabled: bool,
    /// Candidates carried into rerank and expansion.
    pub rerank_top_k: usize,
    pub graph_expansion_enabled: bool,
    /// Edges below this confidence are never traversed.
    pub graph_expansion_min_edge_confidence: f64,
    /// Multiplier applied to `parent_score * edge_confidence`.
    pub graph_expansion_discount: f64,
    /// Final-limit slots reserved for expanded neighbors.
    pub graph_expansion_reserved_slots: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fts_weight: 1.0,
            vector_weight: 1.0,
            vector_score_threshold: 0.25,
            min_result_score_threshold: 0.1,
            query_rewrite_enabled: false,
            reranking_enabled: false,
            rerank_top_k: 25,
            graph_expansion_enabled: true,
            graph_expansion_min_edge_confidence: 0.5,
            graph_expansion_discount: 0.5,
            graph_expansion_reserved_slots: 2,
        }
    }
}

impl RetrievalConfig {
    /// Clamp nonsensical values back to defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.rerank_top_k == 0 {
            self.rerank_top_k = defaults.rerank_top_k;
        }
        if !(0.0..=1.0).contains(&self.graph_expansion_min_edge_confidence) {
            self.graph_expansion_min_edge_confidence = defaults.graph_expansion_min_edge_confidence;
        }
        if !(0.0..=1.0).contains(&self.graph_expansion_discount) {
            self.graph_expansion_discount = defaults.graph_expansion_discount;
        }
        if self.fts_weight < 0.0 {
            self.fts_weight = defaults.fts_weight;
        }
        if self.vector_weight < 0.0 {
            self.vector_weight = defaults.vector_weight;
        }
        self
    }
}
