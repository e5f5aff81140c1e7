use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Partial failure escalated: every unit of work failed, each named.
    #[error("all {} chunks failed: {}", .0.len(), .0.join("; "))]
    AllChunksFailed(Vec<String>),

    /// The run succeeded but extracted nothing. Distinct from extraction
    /// failure so users can tell "nothing found" from "broken".
    #[error("{0}")]
    NoFindings(String),

    #[error("both documentation tracks failed: features: {features}; workflows: {workflows}")]
    BothTracksFailed { features: String, workflows: String },

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("tool '{tool}' rejected: {reason}")]
    ToolRejected { tool: String, reason: String },

    #[error("git command failed: {0}")]
    Git(String),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error(transparent)]
    Llm(#[from] taskwing_llm::LlmError),

    #[error(transparent)]
    Gather(#[from] taskwing_gather::GatherError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
