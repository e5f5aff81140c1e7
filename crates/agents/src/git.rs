//! Git history agent: mines commit history for milestones (releases,
//! migrations, architecture changes) in recency-weighted chunks.

use crate::agent::{Agent, AgentBase, Extraction};
use crate::dedup::{DedupConfig, Deduplicator};
use crate::error::{AgentError, Result};
use crate::prompts;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use taskwing_llm::{ChainOutcome, ChatModel, LlmError};
use taskwing_protocol::{AgentInput, AgentOutput, Finding};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const MAX_COMMITS: usize = 300;
const CHUNK_SIZE: usize = 50;
const MAX_CHUNKS: usize = 6;

/// Field separator in the custom `git log` format.
const FIELD_SEP: char = '\u{1f}';

#[derive(Debug, Clone)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub subject: String,
}

impl Commit {
    /// Conventional-commit `type(scope):` prefix, when present.
    pub fn conventional(&self) -> Option<(String, Option<String>)> {
        let head = self.subject.split(':').next()?;
        if head == self.subject {
            return None;
        }
        let head = head.trim();
        match head.split_once('(') {
            Some((ty, rest)) => {
                let scope = rest.strip_suffix(')')?;
                valid_type(ty).then(|| (ty.to_string(), Some(scope.to_string())))
            }
            None => valid_type(head).then(|| (head.to_string(), None)),
        }
    }
}

fn valid_type(s: &str) -> bool {
    !s.is_empty() && s.len() <= 12 && s.chars().all(|c| c.is_ascii_alphanumeric())
}

pub struct GitAgent {
    base: AgentBase,
}

impl GitAgent {
    pub const ID: &'static str = "git";

    pub fn new(model: Arc<dyn ChatModel>, config: taskwing_llm::ChainConfig) -> Self {
        Self {
            base: AgentBase::new(
                Self::ID,
                "Extracts project milestones and decisions from commit history",
                model,
                config,
            ),
        }
    }

    async fn git(ctx: &CancellationToken, dir: &Path, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir).stdin(Stdio::null()).kill_on_drop(true);
        let output = tokio::select! {
            _ = ctx.cancelled() => return Err(AgentError::Llm(LlmError::Cancelled)),
            out = cmd.output() => out?,
        };
        if !output.status.success() {
            return Err(AgentError::Git(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Monorepo scoping: when the project root sits below the git root, the
    /// log is restricted to the subpath. A relative path that escapes upward
    /// means the context is corrupted and scoping is dropped.
    async fn scope_path(ctx: &CancellationToken, base: &Path) -> Option<String> {
        let toplevel = Self::git(ctx, base, &["rev-parse", "--show-toplevel"]).await.ok()?;
        let git_root = Path::new(toplevel.trim());
        let canonical = base.canonicalize().ok()?;
        if canonical == git_root {
            return None;
        }
        match canonical.strip_prefix(git_root) {
            Ok(rel) => {
                let rel = rel.to_string_lossy().into_owned();
                if rel.starts_with("..") {
                    log::warn!("git scoping path escapes the repository, dropping scope");
                    None
                } else {
                    Some(rel)
                }
            }
            Err(_) => {
                log::warn!("project root is not under its git root, dropping scope");
                None
            }
        }
    }

    async fn recent_commits(
        ctx: &CancellationToken,
        base: &Path,
        scope: Option<&str>,
    ) -> Result<Vec<Commit>> {
        let max = MAX_COMMITS.to_string();
        let mut args = vec![
            "log",
            "--date=short",
            "--pretty=format:%H\u{1f}%an\u{1f}%ad\u{1f}%s",
            "-n",
            max.as_str(),
        ];
        if let Some(path) = scope {
            args.push("--");
            args.push(path);
        }
        let stdout = Self::git(ctx, base, &args).await?;
        Ok(parse_commits(&stdout))
    }

    async fn first_commit_date(ctx: &CancellationToken, base: &Path, scope: Option<&str>) -> Option<String> {
        let mut args = vec![
            "log",
            "--reverse",
            "--date=short",
            "--pretty=format:%ad",
            "-n",
            "1",
        ];
        if let Some(path) = scope {
            args.push("--");
            args.push(path);
        }
        let out = Self::git(ctx, base, &args).await.ok()?;
        let first = out.lines().next()?.trim();
        (!first.is_empty()).then(|| first.to_string())
    }

    async fn analyze_chunk(
        &self,
        ctx: &CancellationToken,
        input: &AgentInput,
        chunk: &[Commit],
        index: usize,
        total: usize,
        metadata: &str,
    ) -> Result<Extraction> {
        let chain = self.base.chain("chunk", &prompts::render(prompts::GIT_CHUNK, &[]));
        let start = index * CHUNK_SIZE + 1;
        let commits = chunk
            .iter()
            .map(|c| format!("{} {} {} {}", &c.hash[..c.hash.len().min(8)], c.date, c.author, c.subject))
            .collect::<Vec<_>>()
            .join("\n");
        let vars = HashMap::from([
            ("project_name".to_string(), input.project_name.clone()),
            ("range".to_string(), format!("{start}-{}", start + chunk.len() - 1)),
            ("total".to_string(), total.to_string()),
            (
                "recency_note".to_string(),
                if index == 0 {
                    " These are the MOST RECENT commits.".to_string()
                } else {
                    String::new()
                },
            ),
            ("max_findings".to_string(), max_findings_for(index).to_string()),
            ("metadata".to_string(), metadata.to_string()),
            ("commits".to_string(), commits),
        ]);
        let out: ChainOutcome<Extraction> = chain.invoke(ctx, &vars).await?;
        Ok(out.parsed.claim(self.base.name))
    }
}

/// Recency-weighted finding quota: newest chunks may report more.
pub fn max_findings_for(chunk_index: usize) -> usize {
    let quota = (8.0 * 0.6f64.powi(chunk_index as i32)) as usize;
    quota.max(2)
}

pub fn parse_commits(log_output: &str) -> Vec<Commit> {
    log_output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, FIELD_SEP);
            Some(Commit {
                hash: fields.next()?.to_string(),
                author: fields.next()?.to_string(),
                date: fields.next()?.to_string(),
                subject: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// Conventional-commit type distribution, active scopes, top contributors.
pub fn describe_history(commits: &[Commit], first_commit_date: Option<&str>) -> String {
    let mut types: HashMap<String, usize> = HashMap::new();
    let mut scopes: HashMap<String, usize> = HashMap::new();
    let mut authors: HashMap<String, usize> = HashMap::new();
    for commit in commits {
        if let Some((ty, scope)) = commit.conventional() {
            *types.entry(ty).or_default() += 1;
            if let Some(scope) = scope {
                *scopes.entry(scope).or_default() += 1;
            }
        }
        *authors.entry(commit.author.clone()).or_default() += 1;
    }

    let mut lines = Vec::new();
    if let Some(date) = first_commit_date {
        lines.push(format!("First commit: {date}"));
    }
    lines.push(format!("Commits analyzed: {}", commits.len()));
    if !types.is_empty() {
        lines.push(format!("Commit types: {}", top_counts(&types, 6)));
    }
    if !scopes.is_empty() {
        lines.push(format!("Active scopes: {}", top_counts(&scopes, 8)));
    }
    lines.push(format!("Top contributors: {}", top_counts(&authors, 5)));
    lines.join("\n")
}

fn top_counts(map: &HashMap<String, usize>, limit: usize) -> String {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    entries
        .into_iter()
        .take(limit)
        .map(|(name, count)| format!("{name} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cross-chunk title dedup, first occurrence (newest chunk) wins.
fn dedup_by_title(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = std::collections::HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert(f.title.to_lowercase()))
        .collect()
}

#[async_trait]
impl Agent for GitAgent {
    fn name(&self) -> &str {
        self.base.name
    }

    fn description(&self) -> &str {
        self.base.description
    }

    async fn run(&self, ctx: &CancellationToken, input: &AgentInput) -> AgentOutput {
        let started = Instant::now();
        let mut output = AgentOutput::named(self.base.name);

        let scope = Self::scope_path(ctx, &input.base_path).await;
        let commits = match Self::recent_commits(ctx, &input.base_path, scope.as_deref()).await {
            Ok(commits) => commits,
            Err(e) => {
                output.error = Some(e.to_string());
                output.duration = started.elapsed();
                return output;
            }
        };
        if commits.is_empty() {
            output.error = Some(AgentError::NoFindings("no git history found".into()).to_string());
            output.duration = started.elapsed();
            return output;
        }

        let first_date = Self::first_commit_date(ctx, &input.base_path, scope.as_deref()).await;
        let metadata = describe_history(&commits, first_date.as_deref());

        let mut extraction = Extraction::default();
        let mut failures = Vec::new();
        let chunks: Vec<&[Commit]> = commits.chunks(CHUNK_SIZE).take(MAX_CHUNKS).collect();
        for (index, chunk) in chunks.iter().enumerate() {
            match self
                .analyze_chunk(ctx, input, chunk, index, commits.len(), &metadata)
                .await
            {
                Ok(part) => extraction.merge(part),
                Err(e) => {
                    log::warn!("git agent: chunk {index} failed: {e}");
                    failures.push(format!("chunk {index}: {e}"));
                }
            }
        }

        if failures.len() == chunks.len() {
            output.error = Some(AgentError::AllChunksFailed(failures).to_string());
        } else if extraction.findings.is_empty() {
            output.error = Some(
                AgentError::NoFindings("git analysis succeeded but found no milestones".into())
                    .to_string(),
            );
        }

        let dedup = Deduplicator::new(DedupConfig::default());
        output.findings = dedup_by_title(extraction.findings);
        output.relationships = dedup.dedup_relationships(extraction.relationships);
        output.duration = started.elapsed();
        output
    }

    async fn close(&self) {
        self.base.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskwing_protocol::FindingKind;

    fn commit(subject: &str, author: &str) -> Commit {
        Commit {
            hash: "abcdef1234567890".into(),
            author: author.into(),
            date: "2026-05-01".into(),
            subject: subject.into(),
        }
    }

    #[test]
    fn quota_decays_with_chunk_age() {
        assert_eq!(max_findings_for(0), 8);
        assert_eq!(max_findings_for(1), 4);
        assert_eq!(max_findings_for(2), 2);
        assert_eq!(max_findings_for(5), 2);
    }

    #[test]
    fn parses_custom_log_format() {
        let raw = "a1\u{1f}Ada\u{1f}2026-01-02\u{1f}feat(core): add budget\n\
                   b2\u{1f}Ben\u{1f}2026-01-01\u{1f}fix: off by one";
        let commits = parse_commits(raw);
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].author, "Ada");
        assert_eq!(commits[1].subject, "fix: off by one");
    }

    #[test]
    fn conventional_prefix_extraction() {
        assert_eq!(
            commit("feat(retrieval): add rerank", "x").conventional(),
            Some(("feat".into(), Some("retrieval".into())))
        );
        assert_eq!(commit("docs: update readme", "x").conventional(), Some(("docs".into(), None)));
        assert_eq!(commit("Merge branch 'main'", "x").conventional(), None);
        assert_eq!(commit("update stuff", "x").conventional(), None);
    }

    #[test]
    fn history_metadata_counts_types_scopes_authors() {
        let commits = vec![
            commit("feat(core): a", "Ada"),
            commit("feat(core): b", "Ada"),
            commit("fix(cli): c", "Ben"),
        ];
        let meta = describe_history(&commits, Some("2025-11-01"));
        assert!(meta.contains("First commit: 2025-11-01"));
        assert!(meta.contains("feat (2)"));
        assert!(meta.contains("core (2)"));
        assert!(meta.contains("Ada (2)"));
    }

    #[test]
    fn titles_dedup_case_insensitively_newest_wins() {
        let mut a = Finding::new(FindingKind::Decision, "Switch to SQLite", "recent");
        a.enforce_evidence_invariant();
        let mut b = Finding::new(FindingKind::Decision, "switch to sqlite", "old");
        b.enforce_evidence_invariant();
        let out = dedup_by_title(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].description, "recent");
    }
}
