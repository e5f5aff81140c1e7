use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A file an agent actually read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRead {
    pub path: String,
    pub chars: usize,
    pub lines: usize,
    pub truncated: bool,
}

/// A file an agent saw but did not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSkip {
    pub path: String,
    pub reason: String,
}

/// Per-agent record of what was and was not read during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Coverage {
    pub files_read: Vec<FileRead>,
    pub files_skipped: Vec<FileSkip>,
}

impl Coverage {
    pub fn record_read(&mut self, path: impl Into<String>, chars: usize, lines: usize, truncated: bool) {
        self.files_read.push(FileRead {
            path: path.into(),
            chars,
            lines,
            truncated,
        });
    }

    pub fn record_skip(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.files_skipped.push(FileSkip {
            path: path.into(),
            reason: reason.into(),
        });
    }

    /// Merge another agent's coverage, de-duplicating by path. Reads win over
    /// skips for the same path.
    pub fn merge(&mut self, other: Coverage) {
        let mut read_paths: HashSet<String> = self.files_read.iter().map(|f| f.path.clone()).collect();
        for read in other.files_read {
            if read_paths.insert(read.path.clone()) {
                self.files_read.push(read);
            }
        }
        let skip_paths: HashSet<String> = self.files_skipped.iter().map(|f| f.path.clone()).collect();
        for skip in other.files_skipped {
            if !read_paths.contains(&skip.path) && !skip_paths.contains(&skip.path) {
                self.files_skipped.push(skip);
            }
        }
        // A path read by any agent never counts as skipped overall.
        self.files_skipped.retain(|s| !read_paths.contains(&s.path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn merge_dedups_by_path() {
        let mut a = Coverage::default();
        a.record_read("src/main.rs", 100, 10, false);
        let mut b = Coverage::default();
        b.record_read("src/main.rs", 120, 12, true);
        b.record_read("src/lib.rs", 50, 5, false);
        a.merge(b);
        assert_eq!(a.files_read.len(), 2);
    }

    #[test]
    fn read_wins_over_skip() {
        let mut a = Coverage::default();
        a.record_skip("src/gen.rs", "generated");
        let mut b = Coverage::default();
        b.record_read("src/gen.rs", 10, 1, false);
        a.merge(b);
        assert!(a.files_skipped.is_empty());
        assert_eq!(a.files_read.len(), 1);
    }
}
