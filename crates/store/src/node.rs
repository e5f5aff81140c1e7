use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use taskwing_protocol::{Evidence, Finding};

/// A finding promoted into the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: String,
    pub title: String,
    /// Content-addressable summary; the upsert key together with type and
    /// workspace.
    pub summary: String,
    pub content: String,
    pub evidence: Vec<Evidence>,
    pub source_agent: String,
    /// `root` or a monorepo subpath; empty means unscoped.
    pub workspace: String,
    pub confidence: f64,
    pub debt_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// Promote a finding. The id is derived from the upsert key so that the
    /// same meaning always lands on the same node.
    pub fn from_finding(finding: &Finding, workspace: &str) -> Self {
        let summary = normalize_summary(&finding.title);
        let node_type = finding.kind.as_str().to_string();
        let id = node_id(&summary, &node_type, workspace);
        let mut content = finding.description.clone();
        if let Some(rationale) = &finding.rationale {
            content.push_str("\n\nRationale: ");
            content.push_str(rationale);
        }
        if let Some(trade_offs) = &finding.trade_offs {
            content.push_str("\n\nTrade-offs: ");
            content.push_str(trade_offs);
        }
        Self {
            id,
            node_type,
            title: finding.title.clone(),
            summary,
            content,
            evidence: finding.evidence.clone(),
            source_agent: finding.source_agent.clone(),
            workspace: workspace.to_string(),
            confidence: finding.confidence.score(),
            debt_score: finding.debt_score,
            created_at: Utc::now(),
        }
    }

    /// Text used for embedding and rerank scoring.
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }

    /// Repo-relative paths this node's evidence cites.
    pub fn evidence_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.evidence.iter().map(|e| e.file_path.clone()).collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Collapse whitespace and case so near-identical titles share an upsert key.
pub fn normalize_summary(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn node_id(summary: &str, node_type: &str, workspace: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(summary.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(node_type.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(workspace.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("node-{hex}")
}

/// Persisted relationship between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEdge {
    pub from_node: String,
    pub to_node: String,
    pub relation: String,
    pub confidence: f64,
    pub properties: serde_json::Value,
}

/// Startup consistency snapshot over stored embeddings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    pub total: usize,
    pub with_embeddings: usize,
    pub without: usize,
    pub dim: Option<usize>,
    pub mixed_dim: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskwing_protocol::FindingKind;

    #[test]
    fn same_meaning_same_id() {
        let a = node_id(&normalize_summary("Token  Budget accounting"), "feature", "root");
        let b = node_id(&normalize_summary("token budget ACCOUNTING"), "feature", "root");
        assert_eq!(a, b);
    }

    #[test]
    fn id_varies_by_type_and_workspace() {
        let base = node_id("x", "feature", "root");
        assert_ne!(base, node_id("x", "risk", "root"));
        assert_ne!(base, node_id("x", "feature", "services/billing"));
    }

    #[test]
    fn promotion_folds_rationale_into_content() {
        let mut finding = Finding::new(FindingKind::Decision, "Use SQLite", "Single-file store.");
        finding.rationale = Some("No server dependency.".into());
        let node = Node::from_finding(&finding, "root");
        assert!(node.content.contains("Rationale: No server dependency."));
        assert_eq!(node.node_type, "decision");
        assert!(node.id.starts_with("node-"));
    }
}
