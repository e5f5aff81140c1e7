//! Wires the pieces together: agent registry, knowledge store, LLM provider,
//! and the retrieval engine, behind the handful of operations the CLI exposes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use taskwing_agents::{
    AgentRegistry, AgentSpec, CodeAgent, Deduplicator, DocAgent, GitAgent, ReactAgent,
};
use taskwing_llm::{ChatModel, Embedder, HttpChatModel};
use taskwing_protocol::{AgentInput, Coverage, Finding, Relationship};
use taskwing_retrieval::{
    ContextAssembler, LexicalReranker, Policy, RetrievalEngine, SearchOptions, SearchResults,
};
use taskwing_store::{EmbeddingStats, KnowledgeStore, Node, MEMORY_DB_PATH};

use crate::config::AppConfig;

const POLICIES_PATH: &str = ".taskwing/policies.json";

/// Outcome of a bootstrap or watch run, for the CLI summary line.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub agents_run: usize,
    pub findings: usize,
    pub nodes_upserted: usize,
    pub edges_linked: usize,
    pub embedded: usize,
    pub coverage: Coverage,
    /// `(agent, reason)` for agents that produced nothing usable.
    pub failures: Vec<(String, String)>,
}

pub struct Orchestrator {
    root: PathBuf,
    config: AppConfig,
    store: Arc<KnowledgeStore>,
    model: Arc<HttpChatModel>,
    workspace: String,
}

impl Orchestrator {
    pub fn new(root: impl Into<PathBuf>, config: AppConfig) -> anyhow::Result<Self> {
        let root = root.into();
        let db_path = root.join(MEMORY_DB_PATH);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let store = Arc::new(KnowledgeStore::open(&db_path)?);
        let model = Arc::new(HttpChatModel::new(config.llm.clone())?);
        Ok(Self {
            root,
            config,
            store,
            model,
            workspace: "root".to_string(),
        })
    }

    /// Tag promoted nodes with a monorepo member path instead of `root`.
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        let workspace = workspace.into();
        if !workspace.is_empty() {
            self.workspace = workspace;
        }
        self
    }

    pub fn registry(&self) -> AgentRegistry {
        let registry = AgentRegistry::new();
        let chain = self.config.chain.clone();
        let budget = self.config.agents.doc_budget_tokens;
        let max_steps = self.config.agents.react_max_steps;

        let model = self.model.clone();
        let cfg = chain.clone();
        registry.register(AgentSpec::new(
            DocAgent::ID,
            "Documentation",
            "Extracts features and workflows from markdown and CI configuration",
            move || Arc::new(DocAgent::new(model.clone(), cfg.clone(), budget)),
        ));

        let model = self.model.clone();
        let cfg = chain.clone();
        registry.register(AgentSpec::new(
            GitAgent::ID,
            "Git history",
            "Mines commit history for milestones and project metadata",
            move || Arc::new(GitAgent::new(model.clone(), cfg.clone())),
        ));

        let model = self.model.clone();
        let cfg = chain.clone();
        registry.register(AgentSpec::new(
            CodeAgent::ID,
            "Code analysis",
            "Analyzes source code in budgeted chunks for components and patterns",
            move || Arc::new(CodeAgent::new(model.clone(), cfg.clone())),
        ));

        let model = self.model.clone();
        registry.register(AgentSpec::new(
            ReactAgent::ID,
            "Exploration",
            "Explores the repository with read-only tools before extracting",
            move || Arc::new(ReactAgent::new(model.clone(), chain.clone(), max_steps)),
        ));

        registry
    }

    pub async fn bootstrap(&self, ctx: &CancellationToken) -> anyhow::Result<IngestSummary> {
        let mut input = AgentInput::bootstrap(&self.root, self.project_name());
        input.workspace = self.workspace.clone();
        self.run_agents(ctx, input, &[]).await
    }

    /// Incremental re-ingest: each agent's stale nodes for the changed files
    /// are dropped before its fresh output is promoted.
    pub async fn watch(
        &self,
        ctx: &CancellationToken,
        changed: Vec<String>,
    ) -> anyhow::Result<IngestSummary> {
        let mut input = AgentInput::watch(&self.root, self.project_name(), changed.clone());
        input.workspace = self.workspace.clone();
        self.seed_existing_context(&mut input);
        self.run_agents(ctx, input, &changed).await
    }

    async fn run_agents(
        &self,
        ctx: &CancellationToken,
        input: AgentInput,
        changed: &[String],
    ) -> anyhow::Result<IngestSummary> {
        let registry = self.registry();
        let mut summary = IngestSummary::default();
        let mut findings: Vec<Finding> = Vec::new();
        let mut relationships: Vec<Relationship> = Vec::new();

        for id in &self.config.agents.enabled {
            if ctx.is_cancelled() {
                anyhow::bail!("ingestion cancelled");
            }
            let agent = match registry.create(id) {
                Ok(agent) => agent,
                Err(e) => {
                    log::warn!("skipping unknown agent {id}: {e}");
                    summary.failures.push((id.clone(), e.to_string()));
                    continue;
                }
            };
            if !changed.is_empty() {
                let removed = self.store.delete_by_files(agent.name(), changed)?;
                if removed > 0 {
                    log::debug!("{id}: dropped {removed} stale nodes for changed files");
                }
            }
            log::info!("running agent {id}");
            crate::crash::record_activity(
                &format!("agent {id} over {}", self.root.display()),
                &changed.join(", "),
            );
            let output = agent.run(ctx, &input).await;
            summary.agents_run += 1;
            log::info!(
                "{id}: {} findings, {} relationships in {:?} ({} files read, {} skipped)",
                output.findings.len(),
                output.relationships.len(),
                output.duration,
                output.coverage.files_read.len(),
                output.coverage.files_skipped.len(),
            );
            if let Some(err) = output.error {
                log::warn!("{id} failed: {err}");
                summary.failures.push((id.clone(), err));
            }
            findings.extend(output.findings);
            relationships.extend(output.relationships);
            summary.coverage.merge(output.coverage);
        }

        let dedup = Deduplicator::default();
        let findings = dedup.dedup_findings(findings);
        let relationships = dedup.dedup_relationships(relationships);
        summary.findings = findings.len();

        self.promote(ctx, &findings, &relationships, &mut summary)
            .await?;
        Ok(summary)
    }

    /// Findings become nodes, relationships become edges between nodes that
    /// both survived promotion. Embedding failures degrade to lexical-only.
    async fn promote(
        &self,
        ctx: &CancellationToken,
        findings: &[Finding],
        relationships: &[Relationship],
        summary: &mut IngestSummary,
    ) -> anyhow::Result<()> {
        let mut by_summary: HashMap<String, String> = HashMap::new();
        let mut pending_embed: Vec<(String, String)> = Vec::new();

        for finding in findings {
            if let Err(e) = finding.validate() {
                log::debug!("dropping invalid finding {:?}: {e}", finding.title);
                continue;
            }
            let node = Node::from_finding(finding, &self.workspace);
            let id = self.store.upsert_by_summary(&node)?;
            by_summary.insert(node.summary.clone(), id.clone());
            pending_embed.push((id, node.text()));
            summary.nodes_upserted += 1;
        }

        for (id, text) in &pending_embed {
            match self.model.embed(ctx, text).await {
                Ok(vector) => {
                    self.store.set_embedding(id, &vector)?;
                    summary.embedded += 1;
                }
                Err(e) => {
                    log::warn!("embedding unavailable, continuing lexical-only: {e}");
                    break;
                }
            }
        }

        for rel in relationships {
            let Some(from) = self.resolve_endpoint(&rel.from, &by_summary) else {
                log::debug!("unresolved relationship endpoint {:?}", rel.from);
                continue;
            };
            let Some(to) = self.resolve_endpoint(&rel.to, &by_summary) else {
                log::debug!("unresolved relationship endpoint {:?}", rel.to);
                continue;
            };
            let properties = serde_json::json!({ "reason": rel.reason });
            match self.store.link(
                &from,
                &to,
                rel.relation.as_str(),
                rel.confidence.score(),
                properties,
            ) {
                Ok(()) => summary.edges_linked += 1,
                Err(e) => log::debug!("skipping edge {from} -> {to}: {e}"),
            }
        }
        Ok(())
    }

    /// Relationship endpoints arrive as finding titles; already-promoted node
    /// ids pass through untouched.
    fn resolve_endpoint(&self, endpoint: &str, by_summary: &HashMap<String, String>) -> Option<String> {
        if endpoint.starts_with("node-") {
            return Some(endpoint.to_string());
        }
        by_summary
            .get(&taskwing_store::node::normalize_summary(endpoint))
            .cloned()
    }

    /// Hand the code agent what the store already knows about the changed
    /// files, so watch runs refine rather than restate.
    fn seed_existing_context(&self, input: &mut AgentInput) {
        let query = input
            .changed_files
            .iter()
            .filter_map(|p| Path::new(p).file_stem().and_then(|s| s.to_str()))
            .collect::<Vec<_>>()
            .join(" ");
        if query.is_empty() {
            return;
        }
        match self.store.search_fts(&query, 20) {
            Ok(hits) if !hits.is_empty() => {
                let nodes: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|(node, _)| {
                        serde_json::json!({
                            "title": node.title,
                            "type": node.node_type,
                            "summary": node.summary,
                        })
                    })
                    .collect();
                input
                    .existing_context
                    .insert("existing_nodes".into(), serde_json::Value::Array(nodes));
            }
            Ok(_) => {}
            Err(e) => log::debug!("existing-context lookup failed: {e}"),
        }
    }

    pub async fn search(
        &self,
        ctx: &CancellationToken,
        query: &str,
        opts: &SearchOptions,
    ) -> anyhow::Result<SearchResults> {
        crate::crash::record_activity(query, "");
        let mut engine = RetrievalEngine::new(self.store.clone(), self.config.retrieval.clone())
            .with_embedder(self.model.clone() as Arc<dyn Embedder>);
        if self.config.retrieval.query_rewrite_enabled {
            engine = engine.with_rewrite_model(self.model.clone() as Arc<dyn ChatModel>);
        }
        if self.config.retrieval.reranking_enabled {
            engine = engine.with_reranker(Arc::new(LexicalReranker));
        }
        Ok(engine.search(ctx, query, opts).await?)
    }

    /// Grounding context for a planner: overview, policies, constraints, then
    /// the ranked evidence.
    pub fn assemble(&self, results: &SearchResults) -> anyhow::Result<String> {
        let policies = self.load_policies()?;
        let assembler = ContextAssembler::new(self.store.clone(), &self.root);
        Ok(assembler.assemble(&results.nodes, &policies)?)
    }

    fn load_policies(&self) -> anyhow::Result<Vec<Policy>> {
        let path = self.root.join(POLICIES_PATH);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn stats(&self) -> anyhow::Result<(usize, EmbeddingStats)> {
        let count = self.store.count()?;
        let stats = self.store.embedding_stats()?;
        if stats.mixed_dim {
            log::warn!(
                "store holds embeddings of mixed dimensions; re-run bootstrap with a single \
                 embedding model to restore vector search"
            );
        }
        Ok((count, stats))
    }

    pub fn rebuild_fts(&self) -> anyhow::Result<usize> {
        Ok(self.store.rebuild_fts()?)
    }

    pub async fn close(&self) {
        self.model.close().await;
    }

    fn project_name(&self) -> String {
        self.root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir) -> Orchestrator {
        Orchestrator::new(dir.path(), AppConfig::default()).unwrap()
    }

    #[test]
    fn registry_lists_all_four_agents() {
        let dir = TempDir::new().unwrap();
        let ids: Vec<_> = orchestrator(&dir)
            .registry()
            .list()
            .into_iter()
            .map(|(id, _, _)| id)
            .collect();
        assert_eq!(ids, vec!["code", "docs", "git", "react"]);
    }

    #[test]
    fn endpoints_resolve_through_normalized_titles() {
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&dir);
        let mut by_summary = HashMap::new();
        by_summary.insert(
            taskwing_store::node::normalize_summary("Token Budget Accounting"),
            "node-abc".to_string(),
        );
        assert_eq!(
            orch.resolve_endpoint("token budget ACCOUNTING", &by_summary),
            Some("node-abc".to_string())
        );
        assert_eq!(
            orch.resolve_endpoint("node-direct", &by_summary),
            Some("node-direct".to_string())
        );
        assert_eq!(orch.resolve_endpoint("unseen title", &by_summary), None);
    }

    #[test]
    fn missing_policies_file_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        assert!(orchestrator(&dir).load_policies().unwrap().is_empty());
    }

    #[test]
    fn policies_parse_from_json() {
        let dir = TempDir::new().unwrap();
        let taskwing = dir.path().join(".taskwing");
        std::fs::create_dir_all(&taskwing).unwrap();
        std::fs::write(
            taskwing.join("policies.json"),
            r#"[{"name": "no-sync-io", "description": "async only in handlers"}]"#,
        )
        .unwrap();
        let policies = orchestrator(&dir).load_policies().unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name, "no-sync-io");
    }

    #[test]
    fn stats_on_fresh_store_report_no_embeddings() {
        let dir = TempDir::new().unwrap();
        let (count, stats) = orchestrator(&dir).stats().unwrap();
        assert_eq!(count, 0);
        assert_eq!(stats.with_embeddings, 0);
        assert!(!stats.mixed_dim);
    }
}
