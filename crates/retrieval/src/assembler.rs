//! Assembles retrieval results into one grounded-context block for a
//! downstream planner. The composition order is fixed: architecture overview,
//! policies, mandatory constraints, then ranked results with citations.

use crate::engine::ScoredNode;
use crate::error::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use taskwing_gather::estimate_tokens;
use taskwing_store::KnowledgeStore;

/// Cap on the rendered policy section.
const POLICY_TOKEN_CAP: usize = 2_000;

/// Overview documents probed in order; the first hit is included.
const ARCHITECTURE_DOCS: &[&str] = &[".taskwing/ARCHITECTURE.md", "ARCHITECTURE.md"];

/// A policy constraint supplied by the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct Policy {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub rule_kinds: Vec<String>,
}

pub struct ContextAssembler {
    store: Arc<KnowledgeStore>,
    repo_root: PathBuf,
}

impl ContextAssembler {
    pub fn new(store: Arc<KnowledgeStore>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            repo_root: repo_root.into(),
        }
    }

    pub fn assemble(&self, results: &[ScoredNode], policies: &[Policy]) -> Result<String> {
        let mut out = String::new();

        if let Some(overview) = self.architecture_overview() {
            out.push_str("# Architecture Overview\n\n");
            out.push_str(&overview);
            out.push_str("\n\n");
        }

        let policy_block = render_policies(policies);
        if !policy_block.is_empty() {
            out.push_str("# Policies\n\n");
            out.push_str(&policy_block);
            out.push('\n');
        }

        // Constraints are always fully listed, never semantically filtered.
        let constraints = self.store.list_by_type("constraint")?;
        if !constraints.is_empty() {
            out.push_str("# Mandatory Constraints\n\n");
            for constraint in &constraints {
                out.push_str(&format!("- **{}**: {}\n", constraint.title, constraint.content));
            }
            out.push('\n');
        }

        if !results.is_empty() {
            out.push_str("# Relevant Architectural Context\n\n");
            for scored in results {
                out.push_str(&render_node(scored));
            }
        }

        Ok(out)
    }

    fn architecture_overview(&self) -> Option<String> {
        for candidate in ARCHITECTURE_DOCS {
            let path = self.repo_root.join(candidate);
            if let Ok(content) = std::fs::read_to_string(&path) {
                log::debug!("assembler: including overview from {}", path.display());
                return Some(content.trim().to_string());
            }
        }
        None
    }
}

fn render_policies(policies: &[Policy]) -> String {
    let mut out = String::new();
    let mut used_tokens = 0usize;
    for policy in policies {
        let kinds = if policy.rule_kinds.is_empty() {
            String::new()
        } else {
            format!("\nRule kinds: {}", policy.rule_kinds.join(", "))
        };
        let block = format!("### Policy: {}\n{}{}\n\n", policy.name, policy.description, kinds);
        let tokens = estimate_tokens(&block);
        if used_tokens + tokens > POLICY_TOKEN_CAP {
            log::debug!("assembler: policy section hit its token cap");
            break;
        }
        out.push_str(&block);
        used_tokens += tokens;
    }
    out
}

fn render_node(scored: &ScoredNode) -> String {
    let node = &scored.node;
    let mut block = format!("## {} ({}, score {:.2})\n{}\n", node.title, node.node_type, scored.score, node.content);
    let citations: Vec<String> = node
        .evidence
        .iter()
        .map(|e| format!("{}:L{}", e.file_path, e.start_line))
        .collect();
    if !citations.is_empty() {
        block.push_str(&format!("References: {}\n", citations.join(", ")));
    }
    if let Some(parent) = &scored.expanded_from {
        block.push_str(&format!("(related to {parent})\n"));
    }
    block.push('\n');
    block
}
