//! Shared domain types for the taskwing knowledge pipeline.
//!
//! Every other crate in the workspace consumes these: agents emit
//! [`Finding`]s backed by [`Evidence`], the deduplicator merges them, the
//! store promotes them to persisted nodes, and the retrieval engine hands
//! them back to planners.

pub mod agent_io;
pub mod coverage;
pub mod evidence;
pub mod finding;
pub mod relationship;

pub use agent_io::{AgentInput, AgentMode, AgentOutput};
pub use coverage::{Coverage, FileRead, FileSkip};
pub use evidence::{Evidence, EvidenceKind};
pub use finding::{Confidence, ConfidenceLabel, Finding, FindingKind, VerificationStatus};
pub use relationship::{Relation, Relationship};

use thiserror::Error;

/// Validation errors for domain types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("evidence span inverted: start_line {start} > end_line {end}")]
    InvertedSpan { start: usize, end: usize },

    #[error("evidence path escapes the repository: {0}")]
    PathTraversal(String),

    #[error("finding '{0}' has no evidence and is not marked skipped")]
    MissingEvidence(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
