use crate::evidence::Evidence;
use crate::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Category of an agent-emitted discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Feature,
    Decision,
    Pattern,
    Constraint,
    Workflow,
    Risk,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Constraint => "constraint",
            Self::Workflow => "workflow",
            Self::Risk => "risk",
        }
    }
}

/// Derived confidence band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

impl ConfidenceLabel {
    /// Canonical score for a bare label (used when a model emits only the
    /// label form).
    pub fn canonical_score(&self) -> f64 {
        match self {
            Self::High => 0.9,
            Self::Medium => 0.6,
            Self::Low => 0.3,
        }
    }
}

/// Confidence as models actually emit it: a number in `[0,1]`, a label, or
/// garbage. `normalize` is the single place the union collapses to
/// `(score, label)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confidence {
    Score(f64),
    Label(String),
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Score(0.5)
    }
}

impl Confidence {
    /// Collapse the polymorphic form to a clamped score and derived label.
    /// Unknown labels and non-finite scores fall back to 0.5 / medium.
    pub fn normalize(&self) -> (f64, ConfidenceLabel) {
        let score = match self {
            Self::Score(s) if s.is_finite() => s.clamp(0.0, 1.0),
            Self::Score(_) => 0.5,
            Self::Label(l) => match l.trim().to_lowercase().as_str() {
                "high" => 0.9,
                "medium" => 0.6,
                "low" => 0.3,
                _ => 0.5,
            },
        };
        let label = if score >= 0.8 {
            ConfidenceLabel::High
        } else if score >= 0.5 {
            ConfidenceLabel::Medium
        } else {
            ConfidenceLabel::Low
        };
        (score, label)
    }

    pub fn score(&self) -> f64 {
        self.normalize().0
    }
}

/// Lazy verification lifecycle of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Partial,
    Rejected,
    Skipped,
}

/// A discovery emitted by an analysis agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_offs: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub source_agent: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub verification: VerificationStatus,
    /// Debt score in `[0,1]`: essential (low) vs accidental (high) complexity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt_score: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Finding {
    pub fn new(kind: FindingKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
            rationale: None,
            trade_offs: None,
            confidence: Confidence::default(),
            source_agent: String::new(),
            evidence: Vec::new(),
            verification: VerificationStatus::default(),
            debt_score: None,
            metadata: HashMap::new(),
        }
    }

    /// Every finding carries evidence or is explicitly skipped.
    pub fn validate(&self) -> Result<()> {
        if self.evidence.is_empty() && self.verification != VerificationStatus::Skipped {
            return Err(ProtocolError::MissingEvidence(self.title.clone()));
        }
        Ok(())
    }

    /// Enforce the evidence invariant in place: evidence-less findings are
    /// downgraded to `Skipped` rather than dropped.
    pub fn enforce_evidence_invariant(&mut self) {
        if self.evidence.is_empty() {
            self.verification = VerificationStatus::Skipped;
        }
    }
}
