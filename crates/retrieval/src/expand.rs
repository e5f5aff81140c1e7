//! Depth-1 graph expansion: neighbors of the top results join the ranking
//! with a discounted score. Cycles are harmless because traversal never goes
//! past direct neighbors.

use crate::config::RetrievalConfig;
use crate::engine::ScoredNode;
use crate::error::Result;
use std::collections::HashSet;
use taskwing_store::KnowledgeStore;

/// Parents considered for expansion.
const EXPANSION_FAN_IN: usize = 5;

pub fn expand(
    store: &KnowledgeStore,
    ranked: &[ScoredNode],
    config: &RetrievalConfig,
) -> Result<Vec<ScoredNode>> {
    let mut included: HashSet<String> = ranked.iter().map(|s| s.node.id.clone()).collect();
    let mut expanded = Vec::new();

    for parent in ranked.iter().take(EXPANSION_FAN_IN) {
        for edge in store.edges_of(&parent.node.id)? {
            if edge.confidence < config.graph_expansion_min_edge_confidence {
                continue;
            }
            let score = parent.score * edge.confidence * config.graph_expansion_discount;
            if score < config.min_result_score_threshold {
                continue;
            }
            if !included.insert(edge.to_node.clone()) {
                continue;
            }
            let Some(node) = store.get(&edge.to_node)? else {
                continue;
            };
            log::debug!(
                "graph expansion: {} -> {} via {} (score {score:.3})",
                parent.node.id,
                edge.to_node,
                edge.relation
            );
            let mut scored = ScoredNode::primary(node, score);
            scored.expanded_from = Some(parent.node.id.clone());
            expanded.push(scored);
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskwing_protocol::{Evidence, Finding, FindingKind};
    use taskwing_store::Node;

    fn seed(store: &KnowledgeStore, title: &str) -> String {
        let mut f = Finding::new(FindingKind::Feature, title, "d");
        f.evidence.push(Evidence::file_span("a.rs", 1, 2, "x").unwrap());
        f.source_agent = "code".into();
        store.upsert_by_summary(&Node::from_finding(&f, "root")).unwrap()
    }

    #[test]
    fn neighbor_score_is_parent_times_confidence_times_discount() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let strong = seed(&store, "Strong parent");
        let weak = seed(&store, "Weak parent");
        let neighbor = seed(&store, "Shared neighbor");
        store.link(&strong, &neighbor, "depends_on", 0.9, serde_json::json!({})).unwrap();
        store.link(&weak, &neighbor, "related_to", 0.4, serde_json::json!({})).unwrap();

        let ranked = vec![
            ScoredNode::primary(store.get(&strong).unwrap().unwrap(), 0.8),
            ScoredNode::primary(store.get(&weak).unwrap().unwrap(), 0.8),
        ];
        let config = RetrievalConfig {
            graph_expansion_min_edge_confidence: 0.5,
            graph_expansion_discount: 0.5,
            ..Default::default()
        };
        let expanded = expand(&store, &ranked, &config).unwrap();

        // only the 0.9-confidence edge survives; 0.8 * 0.9 * 0.5 = 0.36
        assert_eq!(expanded.len(), 1);
        assert!((expanded[0].score - 0.36).abs() < 1e-9);
        assert_eq!(expanded[0].expanded_from.as_deref(), Some(strong.as_str()));
    }

    #[test]
    fn already_ranked_nodes_are_not_expanded_again() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let a = seed(&store, "Node a");
        let b = seed(&store, "Node b");
        store.link(&a, &b, "uses", 0.9, serde_json::json!({})).unwrap();

        let ranked = vec![
            ScoredNode::primary(store.get(&a).unwrap().unwrap(), 0.8),
            ScoredNode::primary(store.get(&b).unwrap().unwrap(), 0.7),
        ];
        let expanded = expand(&store, &ranked, &RetrievalConfig::default()).unwrap();
        assert!(expanded.is_empty());
    }

    #[test]
    fn sub_threshold_neighbors_are_skipped() {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let a = seed(&store, "Node a");
        let b = seed(&store, "Node b");
        store.link(&a, &b, "uses", 0.6, serde_json::json!({})).unwrap();

        let ranked = vec![ScoredNode::primary(store.get(&a).unwrap().unwrap(), 0.1)];
        // 0.1 * 0.6 * 0.5 = 0.03 < min_result_score_threshold
        let expanded = expand(&store, &ranked, &RetrievalConfig::default()).unwrap();
        assert!(expanded.is_empty());
    }
}
