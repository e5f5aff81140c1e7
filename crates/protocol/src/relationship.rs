use crate::finding::Confidence;
use serde::{Deserialize, Serialize};

/// Directed relation between findings, by title.
///
/// Open-ended on the wire: models occasionally invent relation names, which
/// land in `Other` instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    DependsOn,
    Affects,
    Extends,
    Implements,
    Uses,
    RelatedTo,
    #[serde(untagged)]
    Other(String),
}

impl Relation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DependsOn => "depends_on",
            Self::Affects => "affects",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Uses => "uses",
            Self::RelatedTo => "related_to",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// A directed edge between two findings, identified by title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub relation: Relation,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: Confidence,
}

impl Relationship {
    /// Key used for case-insensitive dedup across chunks.
    pub fn dedup_key(&self) -> (String, String, String) {
        (
            self.from.to_lowercase(),
            self.to.to_lowercase(),
            self.relation.as_str().to_lowercase(),
        )
    }
}
