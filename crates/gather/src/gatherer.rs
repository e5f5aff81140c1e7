use crate::budget::{estimate_tokens, ContextBudget};
use crate::error::{GatherError, Result};
use crate::scoring;
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskwing_protocol::Coverage;

/// Caps for one gather pass.
#[derive(Debug, Clone)]
pub struct GatherConfig {
    /// Maximum number of source files included.
    pub max_files: usize,
    /// Per-file character cap.
    pub per_file_chars: usize,
    /// Total character cap across all included files.
    pub total_chars: usize,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            max_files: 50,
            per_file_chars: 4_000,
            total_chars: 150_000,
        }
    }
}

/// Result of a gather: a single formatted block plus coverage bookkeeping.
#[derive(Debug, Default)]
pub struct GatheredContext {
    pub text: String,
    pub coverage: Coverage,
    /// Repo-relative paths included, in inclusion order.
    pub files: Vec<String>,
}

impl GatheredContext {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Walks the repository and assembles priority-ordered, line-numbered,
/// size-bounded excerpts, recording coverage for later reporting.
pub struct ContextGatherer {
    root: PathBuf,
    config: GatherConfig,
    budget: Arc<ContextBudget>,
}

impl ContextGatherer {
    /// A gather without a budget is a hard failure, never a silent
    /// unlimited read.
    pub fn new(
        root: impl AsRef<Path>,
        budget: Option<Arc<ContextBudget>>,
        config: GatherConfig,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let budget =
            budget.ok_or_else(|| GatherError::MissingBudget(root.display().to_string()))?;
        Ok(Self {
            root,
            config,
            budget,
        })
    }

    /// All analysis roots: the repo root plus monorepo packages detected by
    /// manifest markers one level down.
    pub fn analysis_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.root.clone()];
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return roots;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if scoring::is_ignored_dir(&name) {
                continue;
            }
            let has_marker = scoring::MANIFEST_MARKERS
                .iter()
                .any(|m| path.join(m).exists());
            if has_marker {
                roots.push(path);
            }
        }
        roots
    }

    /// Phased source collection: entry points, scored walk, consumption in
    /// score order until a cap trips.
    pub fn collect_source(&self) -> Result<GatheredContext> {
        let mut out = GatheredContext::default();
        let mut included: HashSet<String> = HashSet::new();
        let mut total_chars = 0usize;

        // Phase 1: canonical entry points, at most 5.
        for path in self.entry_points() {
            if included.len() >= 5 {
                break;
            }
            self.consume_file(&path, &mut out, &mut included, &mut total_chars)?;
        }

        // Phase 2: score every candidate.
        let mut candidates: Vec<(i32, PathBuf)> = Vec::new();
        for root in self.analysis_roots() {
            for path in self.walk_source(&root) {
                let rel = self.rel_path(&path);
                if included.contains(&rel) {
                    continue;
                }
                let score = scoring::score_file(Path::new(&rel));
                candidates.push((score, path));
            }
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        // Phase 3: consume in score order until a cap trips.
        for (_, path) in candidates {
            if included.len() >= self.config.max_files {
                out.coverage.record_skip(self.rel_path(&path), "file cap reached");
                continue;
            }
            if total_chars >= self.config.total_chars {
                out.coverage
                    .record_skip(self.rel_path(&path), "total char cap reached");
                continue;
            }
            self.consume_file(&path, &mut out, &mut included, &mut total_chars)?;
        }

        log::info!(
            "Gathered {} source files ({} chars, {} skipped)",
            out.files.len(),
            total_chars,
            out.coverage.files_skipped.len()
        );
        Ok(out)
    }

    /// Markdown and package-doc collection: roots, docs/, and per-package
    /// README/AGENTS/DESIGN/API/SECURITY files. The first file keeps 4 000
    /// chars, the rest 3 000.
    pub fn collect_markdown(&self, subset: Option<&[String]>) -> Result<GatheredContext> {
        let mut out = GatheredContext::default();
        let mut seen: HashSet<String> = HashSet::new();

        let subset_keys: Option<HashSet<String>> =
            subset.map(|s| s.iter().map(|p| p.to_lowercase()).collect());

        let mut paths: Vec<PathBuf> = Vec::new();
        for root in self.analysis_roots() {
            for name in DOC_BASENAMES {
                let candidate = root.join(format!("{name}.md"));
                if candidate.is_file() {
                    paths.push(candidate);
                }
            }
            let docs = root.join("docs");
            if docs.is_dir() {
                for path in self.walk_markdown(&docs) {
                    paths.push(path);
                }
            }
        }

        for path in paths {
            let key = self.rel_path(&path).to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(keys) = &subset_keys {
                if !keys.contains(&key) {
                    continue;
                }
            }
            let cap = if out.files.is_empty() { 4_000 } else { 3_000 };
            self.append_file(&path, cap, &mut out)?;
        }
        Ok(out)
    }

    /// CI configuration files, used by the documentation agent's
    /// workflows/constraints track.
    pub fn collect_ci(&self) -> Result<GatheredContext> {
        let mut out = GatheredContext::default();
        let workflows = self.root.join(".github").join("workflows");
        if workflows.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&workflows)?
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            for path in entries {
                self.append_file(&path, 3_000, &mut out)?;
            }
        }
        for name in [".gitlab-ci.yml", ".travis.yml", "Jenkinsfile"] {
            let candidate = self.root.join(name);
            if candidate.is_file() {
                self.append_file(&candidate, 3_000, &mut out)?;
            }
        }
        Ok(out)
    }

    fn entry_points(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let dirs = [
            self.root.clone(),
            self.root.join("cmd"),
            self.root.join("src"),
        ];
        for dir in dirs {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
            paths.sort();
            for path in paths {
                if !path.is_file() || !scoring::is_source_file(&path) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if scoring::ENTRY_POINT_STEMS.contains(&stem.to_lowercase().as_str()) {
                    found.push(path);
                }
                if found.len() >= 5 {
                    return found;
                }
            }
        }
        found
    }

    pub(crate) fn walk_source(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut builder = WalkBuilder::new(root);
        builder
            .follow_links(false)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                return !scoring::is_ignored_dir(&name);
            }
            true
        });
        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() || file_type.is_symlink() {
                        continue;
                    }
                    let path = entry.path();
                    if !scoring::is_source_file(path) || scoring::is_test_file(path) {
                        continue;
                    }
                    files.push(path.to_path_buf());
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }
        files
    }

    fn walk_markdown(&self, root: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut builder = WalkBuilder::new(root);
        builder.follow_links(false).hidden(false);
        builder.filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                return !scoring::is_ignored_dir(&name);
            }
            true
        });
        for entry in builder.build().flatten() {
            let path = entry.path();
            if path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("md"))
                    .unwrap_or(false)
            {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        files
    }

    fn consume_file(
        &self,
        path: &Path,
        out: &mut GatheredContext,
        included: &mut HashSet<String>,
        total_chars: &mut usize,
    ) -> Result<()> {
        let rel = self.rel_path(path);
        if included.contains(&rel) {
            return Ok(());
        }
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                out.coverage.record_skip(&rel, format!("unreadable: {e}"));
                return Ok(());
            }
        };
        let remaining = self.config.total_chars.saturating_sub(*total_chars);
        let cap = self.config.per_file_chars.min(remaining);
        let (body, truncated) = truncate_utf8(&content, cap);
        if body.is_empty() {
            out.coverage.record_skip(&rel, "empty after truncation");
            return Ok(());
        }

        let block = format!("## {}\n```\n{}```\n\n", rel, numbered(body));
        match self.budget.reserve(estimate_tokens(&block)) {
            Ok(()) => {}
            Err(GatherError::BudgetExceeded { .. }) => {
                out.coverage.record_skip(&rel, "token budget exhausted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        *total_chars += body.len();
        out.coverage
            .record_read(&rel, body.len(), body.lines().count(), truncated);
        out.text.push_str(&block);
        out.files.push(rel.clone());
        included.insert(rel);
        Ok(())
    }

    fn append_file(&self, path: &Path, cap: usize, out: &mut GatheredContext) -> Result<()> {
        let rel = self.rel_path(path);
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                out.coverage.record_skip(&rel, format!("unreadable: {e}"));
                return Ok(());
            }
        };
        let (body, truncated) = truncate_utf8(&content, cap);
        let block = format!("## {}\n```\n{}```\n\n", rel, numbered(body));
        match self.budget.reserve(estimate_tokens(&block)) {
            Ok(()) => {}
            Err(GatherError::BudgetExceeded { .. }) => {
                out.coverage.record_skip(&rel, "token budget exhausted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        out.coverage
            .record_read(&rel, body.len(), body.lines().count(), truncated);
        out.text.push_str(&block);
        out.files.push(rel);
        Ok(())
    }

    pub fn rel_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

const DOC_BASENAMES: &[&str] = &["README", "AGENTS", "DESIGN", "API", "SECURITY"];

/// Truncate at a valid UTF-8 boundary: strip trailing bytes until the
/// remainder validates. Returns the slice and whether truncation happened.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> (&str, bool) {
    if s.len() <= max_bytes {
        return (s, false);
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], true)
}

/// Prefix each line with a right-aligned line number.
pub fn numbered(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + content.lines().count() * 8);
    for (i, line) in content.lines().enumerate() {
        out.push_str(&format!("{:>4} | {}\n", i + 1, line));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn budget() -> Option<Arc<ContextBudget>> {
        Some(Arc::new(ContextBudget::new(80_000)))
    }

    #[test]
    fn missing_budget_is_a_hard_fail() {
        let temp = tempdir().unwrap();
        let err = ContextGatherer::new(temp.path(), None, GatherConfig::default()).err().unwrap();
        assert!(matches!(err, GatherError::MissingBudget(_)));
    }

    #[test]
    fn entry_points_capped_at_five() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        for name in ["main.rs", "index.js", "app.py", "server.go", "main.go"] {
            fs::write(temp.path().join(name), "x").unwrap();
        }
        for name in ["main.ts", "index.ts", "app.ts"] {
            fs::write(src.join(name), "x").unwrap();
        }
        let gatherer = ContextGatherer::new(temp.path(), budget(), GatherConfig::default()).unwrap();
        assert!(gatherer.entry_points().len() <= 5);
    }

    #[test]
    fn collect_orders_by_priority() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("middleware")).unwrap();
        fs::create_dir_all(temp.path().join("services")).unwrap();
        fs::write(temp.path().join("middleware/auth.go"), "package middleware\n").unwrap();
        fs::write(temp.path().join("services/billing.go"), "package services\n").unwrap();
        let gatherer = ContextGatherer::new(temp.path(), budget(), GatherConfig::default()).unwrap();
        let out = gatherer.collect_source().unwrap();
        let auth = out.files.iter().position(|f| f.contains("auth")).unwrap();
        let billing = out.files.iter().position(|f| f.contains("billing")).unwrap();
        assert!(auth < billing);
    }

    #[test]
    fn exhausted_budget_records_skips() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.rs"), "x".repeat(400)).unwrap();
        fs::write(temp.path().join("b.rs"), "y".repeat(400)).unwrap();
        let tiny = Some(Arc::new(ContextBudget::new(120)));
        let gatherer = ContextGatherer::new(temp.path(), tiny, GatherConfig::default()).unwrap();
        let out = gatherer.collect_source().unwrap();
        assert!(!out.coverage.files_skipped.is_empty());
        assert!(out
            .coverage
            .files_skipped
            .iter()
            .any(|s| s.reason.contains("budget")));
    }

    #[test]
    fn monorepo_packages_become_roots() {
        let temp = tempdir().unwrap();
        let pkg = temp.path().join("billing");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("go.mod"), "module billing\n").unwrap();
        let gatherer = ContextGatherer::new(temp.path(), budget(), GatherConfig::default()).unwrap();
        let roots = gatherer.analysis_roots();
        assert_eq!(roots.len(), 2);
        assert!(roots.iter().any(|r| r.ends_with("billing")));
    }

    #[test]
    fn markdown_dedups_by_lowercased_path() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("README.md"), "# hello\n").unwrap();
        let gatherer = ContextGatherer::new(temp.path(), budget(), GatherConfig::default()).unwrap();
        let out = gatherer.collect_markdown(None).unwrap();
        assert_eq!(out.files.len(), 1);
        assert!(out.text.contains("# hello"));
    }

    #[test]
    fn truncate_utf8_respects_boundaries() {
        let s = "日本語のテキスト";
        for max in 0..s.len() {
            let (cut, truncated) = truncate_utf8(s, max);
            assert!(truncated);
            assert!(cut.len() <= max);
            assert!(std::str::from_utf8(cut.as_bytes()).is_ok());
        }
        let (full, truncated) = truncate_utf8(s, s.len());
        assert_eq!(full, s);
        assert!(!truncated);
    }

    #[test]
    fn numbered_lines_are_one_based() {
        let out = numbered("a\nb");
        assert_eq!(out, "   1 | a\n   2 | b\n");
    }
}
