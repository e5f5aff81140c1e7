//! Code agent: budgeted source analysis.
//!
//! Bootstrap prefers the compact symbol view when an index exists, falling
//! back to chunked raw analysis. Chunks are processed sequentially so budget
//! accounting and error messages stay deterministic; partial success is the
//! default.

use crate::agent::{Agent, AgentBase, Extraction};
use crate::dedup::{DedupConfig, Deduplicator};
use crate::error::{AgentError, Result};
use crate::prompts;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use taskwing_gather::{
    numbered, truncate_utf8, ContextBudget, ContextGatherer, GatherConfig, SymbolContext,
    SymbolContextConfig, MAX_SAFE_CONTEXT_TOKENS,
};
use taskwing_llm::{max_input_tokens, ChainOutcome, ChatModel};
use taskwing_protocol::{AgentInput, AgentMode, AgentOutput, Coverage};
use tokio_util::sync::CancellationToken;

/// Tokens held back from the model window for prompt scaffolding and reply.
const PROMPT_OVERHEAD_TOKENS: usize = 10_000;
/// Target tokens per chunk.
const CHUNK_TOKENS: usize = 30_000;
/// Existing-knowledge prefix cap.
const EXISTING_CONTEXT_CHARS: usize = 8_000;

pub struct CodeAgent {
    base: AgentBase,
}

impl CodeAgent {
    pub const ID: &'static str = "code";

    pub fn new(model: Arc<dyn ChatModel>, config: taskwing_llm::ChainConfig) -> Self {
        Self {
            base: AgentBase::new(
                Self::ID,
                "Extracts features, patterns, and risks from source code",
                model,
                config,
            ),
        }
    }

    fn existing_context(&self, input: &AgentInput) -> (String, String) {
        match input.existing_context.get("existing_nodes") {
            Some(value) => {
                let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
                let (truncated, _) = truncate_utf8(&rendered, EXISTING_CONTEXT_CHARS);
                (
                    "Knowledge from prior runs is included below; do not re-report it unchanged."
                        .to_string(),
                    format!("## Existing knowledge\n{truncated}\n"),
                )
            }
            None => (String::new(), String::new()),
        }
    }

    async fn invoke(
        &self,
        ctx: &CancellationToken,
        chain_name: &str,
        input: &AgentInput,
        context: String,
    ) -> Result<(Extraction, String)> {
        let (existing_note, existing) = self.existing_context(input);
        let chain = self.base.chain(chain_name, &prompts::render(prompts::CODE_ANALYSIS, &[]));
        let vars = HashMap::from([
            ("project_name".to_string(), input.project_name.clone()),
            ("existing_note".to_string(), existing_note),
            ("existing_context".to_string(), existing),
            ("context".to_string(), context),
        ]);
        let out: ChainOutcome<Extraction> = chain.invoke(ctx, &vars).await?;
        Ok((out.parsed.claim(self.base.name), out.raw))
    }

    /// Watch mode: one call over the union of changed files.
    async fn watch(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> Result<Extraction> {
        let config = GatherConfig::default();
        let mut coverage = Coverage::default();
        let mut text = String::new();
        for rel in input.changed_files.iter().take(config.max_files) {
            let path = input.base_path.join(rel);
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let (slice, cut) = truncate_utf8(&content, config.per_file_chars);
                    coverage.record_read(rel.clone(), slice.len(), slice.lines().count(), cut);
                    text.push_str(&format!("## {rel}\n{}\n", numbered(slice)));
                }
                Err(e) => coverage.record_skip(rel.clone(), format!("unreadable: {e}")),
            }
        }
        output.coverage.merge(coverage);
        if text.is_empty() {
            return Ok(Extraction::default());
        }
        let (extraction, raw) = self.invoke(ctx, "watch", input, text).await?;
        output.raw_output = raw;
        Ok(extraction)
    }

    /// Symbol path: one call over the compact symbol view, if an index
    /// exists and yields anything.
    async fn try_symbols(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> Result<Option<Extraction>> {
        let Some(symbols) = SymbolContext::open(&input.base_path)? else {
            return Ok(None);
        };
        let Some(view) = symbols.build(&SymbolContextConfig::default())? else {
            log::debug!("symbol index present but empty, falling back to chunked analysis");
            return Ok(None);
        };
        let (extraction, raw) = self.invoke(ctx, "symbols", input, view).await?;
        output.raw_output = raw;
        Ok(Some(extraction))
    }

    /// Chunked path: sequential per-chunk calls; per-chunk failures are
    /// tolerated unless every chunk fails.
    async fn chunked(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> Result<Extraction> {
        let model_limit = max_input_tokens(self.base.model.model_name());
        let max_chunks = max_chunks_for(model_limit);
        let budget = Arc::new(ContextBudget::for_model(model_limit));
        let gatherer =
            ContextGatherer::new(&input.base_path, Some(budget), GatherConfig::default())?;
        let chunker = taskwing_gather::CodeChunker::new(gatherer, Default::default());
        let plan = chunker.chunk(max_chunks)?;
        output.coverage.merge(plan.coverage);

        let mut extraction = Extraction::default();
        let mut failures = Vec::new();
        let total = plan.chunks.len();
        for chunk in &plan.chunks {
            let header = format!(
                "Analyzing chunk {}/{total}: {}\n\n",
                chunk.index + 1,
                chunk.description
            );
            match self
                .invoke(ctx, "chunk", input, format!("{header}{}", chunk.render()))
                .await
            {
                Ok((part, raw)) => {
                    extraction.merge(part);
                    output.raw_output.push_str(&raw);
                    output.raw_output.push('\n');
                }
                Err(e) => {
                    log::warn!("code agent: chunk {} failed: {e}", chunk.index);
                    failures.push(format!("chunk {}: {e}", chunk.index));
                }
            }
        }
        if !plan.chunks.is_empty() && failures.len() == plan.chunks.len() {
            return Err(AgentError::AllChunksFailed(failures));
        }
        Ok(extraction)
    }
}

/// `max(1, (min(model_limit, safety_cap) − overhead) / chunk_tokens)`.
pub fn max_chunks_for(model_limit: usize) -> usize {
    let usable = model_limit.min(MAX_SAFE_CONTEXT_TOKENS).saturating_sub(PROMPT_OVERHEAD_TOKENS);
    (usable / CHUNK_TOKENS).max(1)
}

#[async_trait]
impl Agent for CodeAgent {
    fn name(&self) -> &str {
        self.base.name
    }

    fn description(&self) -> &str {
        self.base.description
    }

    async fn run(&self, ctx: &CancellationToken, input: &AgentInput) -> AgentOutput {
        let started = Instant::now();
        let mut output = AgentOutput::named(self.base.name);

        let result = match input.mode {
            AgentMode::Watch => self.watch(ctx, input, &mut output).await,
            AgentMode::Bootstrap => match self.try_symbols(ctx, input, &mut output).await {
                Ok(Some(extraction)) => Ok(extraction),
                Ok(None) => self.chunked(ctx, input, &mut output).await,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(extraction) => {
                let dedup = Deduplicator::new(DedupConfig::default());
                output.findings = dedup.dedup_findings(extraction.findings);
                output.relationships = dedup.dedup_relationships(extraction.relationships);
                if output.findings.is_empty() && input.mode == AgentMode::Bootstrap {
                    output.error = Some(
                        AgentError::NoFindings(
                            "code analysis succeeded but produced no findings".into(),
                        )
                        .to_string(),
                    );
                }
            }
            Err(e) => output.error = Some(e.to_string()),
        }
        output.duration = started.elapsed();
        output
    }

    async fn close(&self) {
        self.base.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use taskwing_llm::testing::ScriptedModel;
    use taskwing_llm::{ChainConfig, LlmError};
    use tempfile::TempDir;

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::write(
            dir.path().join("src/main.rs"),
            "fn main() {\n    println!(\"hi\");\n}\n",
        )
        .unwrap();
        dir
    }

    fn extraction_json(title: &str) -> String {
        format!(
            r#"{{"findings": [{{"kind": "pattern", "title": "{title}", "description": "d",
                "evidence": [{{"file_path": "src/main.rs", "start_line": 1, "end_line": 3, "snippet": "fn main"}}]}}]}}"#
        )
    }

    fn fast_config() -> ChainConfig {
        ChainConfig {
            max_retries: 1,
            retry_base_delay_ms: 1,
            ..ChainConfig::default()
        }
    }

    #[test]
    fn chunk_count_follows_model_window() {
        // 128k window clamps to the 80k safety cap: (80000-10000)/30000 = 2
        assert_eq!(max_chunks_for(128_000), 2);
        // small windows always get one chunk
        assert_eq!(max_chunks_for(8_192), 1);
        assert_eq!(max_chunks_for(16_384), 1);
    }

    #[tokio::test]
    async fn bootstrap_without_symbol_index_uses_chunks() {
        let dir = repo();
        let model = Arc::new(ScriptedModel::always(&extraction_json("Entry point")));
        let agent = CodeAgent::new(model.clone(), fast_config());
        let out = agent
            .run(&CancellationToken::new(), &AgentInput::bootstrap(dir.path(), "demo"))
            .await;
        assert!(out.error.is_none(), "unexpected error: {:?}", out.error);
        assert_eq!(out.findings.len(), 1);
        assert!(model.calls() >= 1);
        assert!(!out.coverage.files_read.is_empty());
    }

    #[tokio::test]
    async fn all_chunks_failing_names_each_failure() {
        let dir = repo();
        let model = Arc::new(ScriptedModel::replying(vec![
            Err(LlmError::Auth("bad key".into())),
            Err(LlmError::Auth("bad key".into())),
            Err(LlmError::Auth("bad key".into())),
        ]));
        let agent = CodeAgent::new(model, fast_config());
        let out = agent
            .run(&CancellationToken::new(), &AgentInput::bootstrap(dir.path(), "demo"))
            .await;
        let err = out.error.unwrap();
        assert!(err.contains("chunks failed"), "{err}");
        assert!(err.contains("chunk 0"), "{err}");
    }

    #[tokio::test]
    async fn watch_reads_only_changed_files() {
        let dir = repo();
        fs::write(dir.path().join("src/new.rs"), "pub fn added() {}\n").unwrap();
        let model = Arc::new(ScriptedModel::replying(vec![Ok(extraction_json("Added fn"))]));
        let agent = CodeAgent::new(model.clone(), fast_config());
        let input = AgentInput::watch(dir.path(), "demo", vec!["src/new.rs".into()]);
        let out = agent.run(&CancellationToken::new(), &input).await;
        assert!(out.error.is_none());
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("src/new.rs"));
        assert!(!prompt.contains("src/main.rs"));
    }

    #[tokio::test]
    async fn existing_knowledge_is_prefixed_to_the_prompt() {
        let dir = repo();
        let model = Arc::new(ScriptedModel::always(&extraction_json("X")));
        let agent = CodeAgent::new(model.clone(), fast_config());
        let mut input = AgentInput::bootstrap(dir.path(), "demo");
        input.existing_context.insert(
            "existing_nodes".into(),
            serde_json::json!([{"id": "node-1", "type": "feature", "summary": "token budget"}]),
        );
        agent.run(&CancellationToken::new(), &input).await;
        assert!(model.prompts()[0].contains("Existing knowledge"));
        assert!(model.prompts()[0].contains("token budget"));
    }
}
