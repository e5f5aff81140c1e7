use crate::coverage::Coverage;
use crate::finding::Finding;
use crate::relationship::Relationship;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How an agent run is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Full-repository analysis.
    #[default]
    Bootstrap,
    /// Incremental re-analysis of `changed_files` only.
    Watch,
}

/// Input handed to every agent's `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub base_path: PathBuf,
    pub project_name: String,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default)]
    pub changed_files: Vec<String>,
    /// Collaborator-provided context, e.g. `existing_nodes` from prior runs.
    #[serde(default)]
    pub existing_context: HashMap<String, serde_json::Value>,
    /// `root` or a monorepo subpath.
    #[serde(default)]
    pub workspace: String,
}

impl AgentInput {
    pub fn bootstrap(base_path: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            project_name: project_name.into(),
            mode: AgentMode::Bootstrap,
            changed_files: Vec::new(),
            existing_context: HashMap::new(),
            workspace: String::new(),
        }
    }

    pub fn watch(
        base_path: impl Into<PathBuf>,
        project_name: impl Into<String>,
        changed_files: Vec<String>,
    ) -> Self {
        Self {
            mode: AgentMode::Watch,
            changed_files,
            ..Self::bootstrap(base_path, project_name)
        }
    }
}

/// Output of one agent run. Errors travel inside the output so orchestrators
/// can decide whether partial results are usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_name: String,
    pub findings: Vec<Finding>,
    pub relationships: Vec<Relationship>,
    pub coverage: Coverage,
    #[serde(default, with = "duration_millis")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub raw_output: String,
}

impl AgentOutput {
    pub fn named(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
