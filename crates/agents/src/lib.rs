//! Analysis agents that extract evidence-backed findings from a repository.
//!
//! Four agents share one contract (`Agent::run`): the documentation agent
//! reads markdown and CI files, the git agent mines commit history, the code
//! agent analyzes source in budgeted chunks, and the ReAct agent explores the
//! tree with whitelisted tools. Errors travel inside `AgentOutput` so the
//! orchestrator can decide whether partial results are usable.

pub mod agent;
pub mod code;
pub mod dedup;
pub mod doc;
pub mod error;
pub mod git;
pub mod prompts;
pub mod react;
pub mod registry;
pub mod tools;

pub use agent::{Agent, AgentBase, Extraction};
pub use code::CodeAgent;
pub use dedup::{DedupConfig, Deduplicator};
pub use doc::DocAgent;
pub use error::{AgentError, Result};
pub use git::GitAgent;
pub use react::ReactAgent;
pub use registry::{AgentRegistry, AgentSpec};
