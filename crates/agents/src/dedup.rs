//! Cross-chunk finding deduplication.
//!
//! Chunked analysis rediscovers the same facts with slightly different
//! wording. Clusters are detected with Jaccard similarity over normalized
//! tokens; one representative per cluster survives with evidence unioned
//! across the duplicates.

use std::collections::HashSet;
use taskwing_protocol::{Finding, Relationship};

/// Words too common to signal similarity.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "for", "on", "with", "is", "are", "this",
    "that", "it", "its", "by", "as", "at", "be", "from", "uses", "use", "using",
];

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Similarity threshold in `(0, 1]`.
    pub threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

impl DedupConfig {
    pub fn sanitized(self) -> Self {
        let threshold = if self.threshold > 0.0 && self.threshold <= 1.0 {
            self.threshold
        } else {
            0.6
        };
        Self { threshold }
    }
}

#[derive(Default)]
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config: config.sanitized(),
        }
    }

    /// Merge a batch of findings, keeping one representative per duplicate
    /// cluster. Idempotent: running the output through again changes nothing.
    pub fn dedup_findings(&self, findings: Vec<Finding>) -> Vec<Finding> {
        let mut merged: Vec<Finding> = Vec::with_capacity(findings.len());
        'outer: for candidate in findings {
            for kept in merged.iter_mut() {
                if self.is_duplicate(kept, &candidate) {
                    merge_into(kept, candidate);
                    continue 'outer;
                }
            }
            merged.push(candidate);
        }
        merged
    }

    /// Dedup relationships by case-insensitive `(from, to, relation)`.
    pub fn dedup_relationships(&self, relationships: Vec<Relationship>) -> Vec<Relationship> {
        let mut seen = HashSet::new();
        relationships
            .into_iter()
            .filter(|r| seen.insert(r.dedup_key()))
            .collect()
    }

    /// Different kinds are never duplicates; otherwise any of title, desc,
    /// or combined similarity crossing the threshold makes a pair.
    fn is_duplicate(&self, a: &Finding, b: &Finding) -> bool {
        if a.kind != b.kind {
            return false;
        }
        let t = self.config.threshold;
        jaccard(&a.title, &b.title) >= t
            || jaccard(&a.description, &b.description) >= t
            || jaccard(
                &format!("{} {}", a.title, a.description),
                &format!("{} {}", b.title, b.description),
            ) >= t
    }
}

/// Keep the higher-confidence representative; union evidence by
/// `(file_path, start_line)`.
fn merge_into(kept: &mut Finding, duplicate: Finding) {
    if duplicate.confidence.score() > kept.confidence.score() {
        let evidence = std::mem::take(&mut kept.evidence);
        *kept = duplicate;
        for ev in evidence {
            push_unique(kept, ev);
        }
    } else {
        for ev in duplicate.evidence {
            push_unique(kept, ev);
        }
    }
}

fn push_unique(finding: &mut Finding, ev: taskwing_protocol::Evidence) {
    if !finding.evidence.iter().any(|e| e.dedup_key() == ev.dedup_key()) {
        finding.evidence.push(ev);
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

pub fn jaccard(a: &str, b: &str) -> f64 {
    let sa = tokenize(a);
    let sb = tokenize(b);
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    intersection / union
}
