use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use taskwing_llm::{Chain, ChainConfig, ChatModel};
use taskwing_protocol::{AgentInput, AgentOutput, Finding, Relationship};
use tokio_util::sync::CancellationToken;

/// The capability set every agent exposes. `run` never returns `Err`; errors
/// travel inside the output.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn run(&self, ctx: &CancellationToken, input: &AgentInput) -> AgentOutput;

    /// Release the model handle. Idempotent.
    async fn close(&self);
}

/// Shared agent state: identity plus the model handle and retry config.
pub struct AgentBase {
    pub name: &'static str,
    pub description: &'static str,
    pub model: Arc<dyn ChatModel>,
    pub chain_config: ChainConfig,
}

impl AgentBase {
    pub fn new(
        name: &'static str,
        description: &'static str,
        model: Arc<dyn ChatModel>,
        chain_config: ChainConfig,
    ) -> Self {
        Self {
            name,
            description,
            model,
            chain_config,
        }
    }

    pub fn chain(&self, chain_name: &str, template: &str) -> Chain {
        Chain::new(
            format!("{}:{chain_name}", self.name),
            template,
            Arc::clone(&self.model),
            self.chain_config.clone(),
        )
    }

    pub async fn close(&self) {
        self.model.close().await;
    }
}

/// The JSON shape every extraction chain parses into.
#[derive(Debug, Default, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Extraction {
    /// Stamp the producing agent and enforce the evidence invariant before
    /// the findings leave the agent boundary.
    pub fn claim(mut self, agent_name: &str) -> Self {
        for finding in &mut self.findings {
            finding.source_agent = agent_name.to_string();
            finding.enforce_evidence_invariant();
        }
        self
    }

    pub fn merge(&mut self, other: Extraction) {
        self.findings.extend(other.findings);
        self.relationships.extend(other.relationships);
    }
}
