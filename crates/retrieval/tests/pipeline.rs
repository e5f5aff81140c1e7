//! End-to-end retrieval over a store populated through the promotion path:
//! findings become nodes, edges link them, and one query flows through
//! recall, expansion, and assembly.

use std::sync::Arc;

use taskwing_llm::testing::HashEmbedder;
use taskwing_llm::Embedder;
use taskwing_protocol::{Evidence, Finding, FindingKind, Relation};
use taskwing_retrieval::{
    ContextAssembler, Policy, RetrievalConfig, RetrievalEngine, SearchOptions,
};
use taskwing_store::{KnowledgeStore, Node};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn finding(kind: FindingKind, title: &str, description: &str, path: &str) -> Finding {
    let mut f = Finding::new(kind, title, description);
    f.source_agent = "code".to_string();
    f.evidence
        .push(Evidence::file_span(path, 1, 20, "fn main() {}").expect("evidence"));
    f
}

async fn seeded_store() -> (Arc<KnowledgeStore>, HashEmbedder) {
    let store = Arc::new(KnowledgeStore::open_in_memory().expect("store"));
    let embedder = HashEmbedder::new(64);
    let ctx = CancellationToken::new();

    let findings = [
        finding(
            FindingKind::Feature,
            "Session token cache",
            "Caches issued session tokens with a sliding TTL eviction policy.",
            "src/cache.rs",
        ),
        finding(
            FindingKind::Feature,
            "Authentication service",
            "Validates credentials and issues signed session tokens.",
            "src/auth.rs",
        ),
        finding(
            FindingKind::Constraint,
            "No plaintext secrets",
            "Credential material never reaches logs or persisted state.",
            "src/auth.rs",
        ),
    ];
    let mut ids = Vec::new();
    for f in &findings {
        let node = Node::from_finding(f, "root");
        let id = store.upsert_by_summary(&node).expect("upsert");
        let vector = embedder.embed(&ctx, &node.text()).await.expect("embed");
        store.set_embedding(&id, &vector).expect("set embedding");
        ids.push(id);
    }

    store
        .link(
            &ids[1],
            &ids[0],
            Relation::DependsOn.as_str(),
            0.9,
            serde_json::json!({ "reason": "auth reads cached tokens" }),
        )
        .expect("link");

    (store, embedder)
}

#[tokio::test]
async fn query_recalls_and_expands_through_edges() {
    let (store, embedder) = seeded_store().await;
    let config = RetrievalConfig {
        min_result_score_threshold: 0.01,
        ..RetrievalConfig::default()
    };
    let engine =
        RetrievalEngine::new(store, config).with_embedder(Arc::new(embedder) as Arc<dyn Embedder>);

    let ctx = CancellationToken::new();
    let results = engine
        .search(&ctx, "authentication service", &SearchOptions::default())
        .await
        .expect("search");

    assert!(!results.nodes.is_empty());
    assert_eq!(results.nodes[0].node.title, "Authentication service");
    let expanded = results
        .nodes
        .iter()
        .find(|scored| scored.expanded_from.is_some())
        .expect("edge neighbor pulled in by expansion");
    assert_eq!(expanded.node.title, "Session token cache");
}

#[tokio::test]
async fn assembled_context_carries_constraints_and_citations() {
    let (store, embedder) = seeded_store().await;
    let temp = TempDir::new().expect("tempdir");
    let taskwing = temp.path().join(".taskwing");
    std::fs::create_dir_all(&taskwing).expect("mkdir");
    std::fs::write(
        taskwing.join("ARCHITECTURE.md"),
        "# Architecture\n\nTwo services behind one gateway.\n",
    )
    .expect("write doc");

    let config = RetrievalConfig {
        min_result_score_threshold: 0.01,
        ..RetrievalConfig::default()
    };
    let engine = RetrievalEngine::new(store.clone(), config)
        .with_embedder(Arc::new(embedder) as Arc<dyn Embedder>);
    let ctx = CancellationToken::new();
    let results = engine
        .search(&ctx, "session tokens", &SearchOptions::default())
        .await
        .expect("search");

    let policies = vec![Policy {
        name: "async-only".to_string(),
        description: "All request handlers stay non-blocking.".to_string(),
        rule_kinds: vec!["style".to_string()],
    }];
    let assembler = ContextAssembler::new(store, temp.path());
    let context = assembler.assemble(&results.nodes, &policies).expect("assemble");

    let overview_at = context.find("Two services behind one gateway").expect("overview");
    let policies_at = context.find("# Policies").expect("policies section");
    let constraints_at = context.find("# Mandatory Constraints").expect("constraints");
    assert!(overview_at < policies_at);
    assert!(policies_at < constraints_at);
    assert!(context.contains("No plaintext secrets"));
    assert!(context.contains("src/cache.rs:L1"));
}
