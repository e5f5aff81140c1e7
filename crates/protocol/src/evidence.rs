use crate::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Where a piece of evidence was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    #[default]
    File,
    Git,
}

/// A verifiable citation of source material.
///
/// `file_path` is always repo-relative. For `Git` evidence the path names the
/// file a commit touched and the line span covers the quoted hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grep_pattern: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: EvidenceKind,
}

impl Evidence {
    /// Build evidence for a file span, rejecting inverted spans and paths
    /// that escape the repository root.
    pub fn file_span(
        file_path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        snippet: impl Into<String>,
    ) -> Result<Self> {
        let file_path = clean_repo_path(file_path.into())?;
        if start_line > end_line {
            return Err(ProtocolError::InvertedSpan {
                start: start_line,
                end: end_line,
            });
        }
        Ok(Self {
            file_path,
            start_line,
            end_line,
            snippet: snippet.into(),
            grep_pattern: None,
            kind: EvidenceKind::File,
        })
    }

    /// Evidence drawn from git history rather than the working tree.
    pub fn git(file_path: impl Into<String>, snippet: impl Into<String>) -> Result<Self> {
        let mut ev = Self::file_span(file_path, 1, 1, snippet)?;
        ev.kind = EvidenceKind::Git;
        Ok(ev)
    }

    /// Attach a grep pattern that re-locates this evidence after edits.
    #[must_use]
    pub fn with_grep_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.grep_pattern = Some(pattern.into());
        self
    }

    /// Key used when unioning evidence lists across duplicate findings.
    pub fn dedup_key(&self) -> (String, usize) {
        (self.file_path.to_lowercase(), self.start_line)
    }
}

/// Normalize a repo-relative path: strip leading `./`, reject `..` and
/// absolute paths.
fn clean_repo_path(raw: String) -> Result<String> {
    let path = Path::new(&raw);
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(p) => parts.push(p.to_str().unwrap_or_default()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ProtocolError::PathTraversal(raw.clone()));
            }
        }
    }
    if parts.is_empty() {
        return Err(ProtocolError::PathTraversal(raw));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cleans_leading_dot_segments() {
        let ev = Evidence::file_span("./src/main.rs", 1, 10, "fn main() {}").unwrap();
        assert_eq!(ev.file_path, "src/main.rs");
    }

    #[test]
    fn rejects_parent_traversal() {
        let err = Evidence::file_span("../etc/passwd", 1, 1, "").unwrap_err();
        assert!(matches!(err, ProtocolError::PathTraversal(_)));
    }

    #[test]
    fn rejects_absolute_paths() {
        let err = Evidence::file_span("/etc/passwd", 1, 1, "").unwrap_err();
        assert!(matches!(err, ProtocolError::PathTraversal(_)));
    }

    #[test]
    fn rejects_inverted_span() {
        let err = Evidence::file_span("src/lib.rs", 20, 10, "").unwrap_err();
        assert_eq!(err, ProtocolError::InvertedSpan { start: 20, end: 10 });
    }

    #[test]
    fn serializes_kind_as_type() {
        let ev = Evidence::git("src/lib.rs", "feat: add parser").unwrap();
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "git");
    }
}
