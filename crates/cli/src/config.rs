//! Application configuration, loaded from `.taskwing/config.toml` at the
//! repository root. Every section is optional; absent keys fall back to
//! defaults so a bare repository works with only an API key in the
//! environment.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use taskwing_llm::{ChainConfig, HttpConfig};
use taskwing_retrieval::RetrievalConfig;

pub const CONFIG_PATH: &str = ".taskwing/config.toml";

const API_KEY_ENV: &str = "TASKWING_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: HttpConfig,
    pub chain: ChainConfig,
    pub retrieval: RetrievalConfig,
    pub agents: AgentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Agents enabled for bootstrap and watch runs.
    pub enabled: Vec<String>,
    /// Step bound for the ReAct agent.
    pub react_max_steps: usize,
    /// Token budget for documentation gathering.
    pub doc_budget_tokens: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["docs".into(), "git".into(), "code".into()],
            react_max_steps: taskwing_agents::react::DEFAULT_MAX_STEPS,
            doc_budget_tokens: taskwing_gather::MAX_SAFE_CONTEXT_TOKENS,
        }
    }
}

impl AppConfig {
    /// Load from `.taskwing/config.toml` under `root`. A missing file is the
    /// default configuration; a malformed one is an error, never a silent
    /// fallback.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_PATH);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid config at {}", path.display()))?
        } else {
            Self::default()
        };
        if config.llm.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.llm.api_key = key;
            }
        }
        Ok(config)
    }
}
