//! Documentation agent: features and decisions from markdown, workflows and
//! constraints from rule files and CI. The two tracks run concurrently on
//! bootstrap and their results are merged with equal status.

use crate::agent::{Agent, AgentBase, Extraction};
use crate::error::AgentError;
use crate::prompts;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use taskwing_gather::{ContextBudget, ContextGatherer, GatherConfig};
use taskwing_llm::{ChainOutcome, ChatModel};
use taskwing_protocol::{AgentInput, AgentMode, AgentOutput};
use tokio_util::sync::CancellationToken;

pub struct DocAgent {
    base: AgentBase,
    budget_tokens: usize,
}

impl DocAgent {
    pub const ID: &'static str = "docs";

    pub fn new(model: Arc<dyn ChatModel>, config: taskwing_llm::ChainConfig, budget_tokens: usize) -> Self {
        Self {
            base: AgentBase::new(
                Self::ID,
                "Extracts features, decisions, workflows, and constraints from documentation and CI",
                model,
                config,
            ),
            budget_tokens,
        }
    }

    fn gatherer(&self, input: &AgentInput) -> crate::error::Result<ContextGatherer> {
        let budget = Arc::new(ContextBudget::for_model(self.budget_tokens));
        Ok(ContextGatherer::new(
            &input.base_path,
            Some(budget),
            GatherConfig::default(),
        )?)
    }

    async fn run_track(
        &self,
        ctx: &CancellationToken,
        chain_name: &str,
        template: &str,
        input: &AgentInput,
        context: String,
    ) -> crate::error::Result<(Extraction, String)> {
        let chain = self.base.chain(chain_name, &prompts::render(template, &[]));
        let vars = HashMap::from([
            ("project_name".to_string(), input.project_name.clone()),
            ("context".to_string(), context),
        ]);
        let out: ChainOutcome<Extraction> = chain.invoke(ctx, &vars).await?;
        Ok((out.parsed.claim(self.base.name), out.raw))
    }

    async fn bootstrap(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> crate::error::Result<Extraction> {
        let markdown = {
            let gatherer = self.gatherer(input)?;
            gatherer.collect_markdown(None)?
        };
        let ci = {
            let gatherer = self.gatherer(input)?;
            gatherer.collect_ci()?
        };
        output.coverage.merge(markdown.coverage);
        output.coverage.merge(ci.coverage);

        let (features, workflows) = tokio::join!(
            self.run_track(ctx, "features", prompts::DOC_FEATURES, input, markdown.text),
            self.run_track(ctx, "workflows", prompts::DOC_WORKFLOWS, input, ci.text),
        );

        match (features, workflows) {
            (Ok((mut a, raw_a)), Ok((b, raw_b))) => {
                a.merge(b);
                output.raw_output = format!("{raw_a}\n{raw_b}");
                Ok(a)
            }
            (Ok((a, raw)), Err(e)) | (Err(e), Ok((a, raw))) => {
                log::warn!("doc agent: one track failed: {e}");
                output.raw_output = raw;
                Ok(a)
            }
            (Err(features), Err(workflows)) => Err(AgentError::BothTracksFailed {
                features: features.to_string(),
                workflows: workflows.to_string(),
            }),
        }
    }

    async fn watch(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        output: &mut AgentOutput,
    ) -> crate::error::Result<Extraction> {
        let markdown = {
            let gatherer = self.gatherer(input)?;
            gatherer.collect_markdown(Some(&input.changed_files))?
        };
        output.coverage.merge(markdown.coverage);
        if markdown.files.is_empty() {
            return Ok(Extraction::default());
        }
        let (extraction, raw) = self
            .run_track(ctx, "watch", prompts::DOC_FEATURES, input, markdown.text)
            .await?;
        output.raw_output = raw;
        Ok(extraction)
    }
}

#[async_trait]
impl Agent for DocAgent {
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
            AgentMode::Bootstrap => self.bootstrap(ctx, input, &mut output).await,
            AgentMode::Watch => self.watch(ctx, input, &mut output).await,
        };

        match result {
            Ok(extraction) => {
                if extraction.findings.is_empty() && input.mode == AgentMode::Bootstrap {
                    output.error = Some(
                        AgentError::NoFindings(
                            "documentation analysis succeeded but produced no findings".into(),
                        )
                        .to_string(),
                    );
                }
                output.findings = extraction.findings;
                output.relationships = extraction.relationships;
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
