use crate::budget::estimate_tokens;
use crate::error::Result;
use crate::gatherer::{numbered, truncate_utf8, ContextGatherer};
use crate::scoring;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use taskwing_protocol::Coverage;

const PER_FILE_CHAR_CAP: usize = 8_000;

/// Configuration for splitting a corpus into token-bounded groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub max_tokens_per_chunk: usize,
    pub max_files_per_chunk: usize,
    pub include_line_numbers: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 30_000,
            max_files_per_chunk: 50,
            include_line_numbers: true,
        }
    }
}

impl ChunkConfig {
    /// Zero caps are operator mistakes; fall back to defaults instead of
    /// producing degenerate chunking.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            max_tokens_per_chunk: if self.max_tokens_per_chunk == 0 {
                log::warn!("max_tokens_per_chunk=0 falls back to default");
                defaults.max_tokens_per_chunk
            } else {
                self.max_tokens_per_chunk
            },
            max_files_per_chunk: if self.max_files_per_chunk == 0 {
                log::warn!("max_files_per_chunk=0 falls back to default");
                defaults.max_files_per_chunk
            } else {
                self.max_files_per_chunk
            },
            include_line_numbers: self.include_line_numbers,
        }
    }
}

/// One file inside a chunk, already formatted for the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFile {
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

/// A bounded group of files assembled for one LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChunk {
    pub index: usize,
    pub files: Vec<ChunkFile>,
    pub token_estimate: usize,
    /// Human-readable summary: top directories by file count.
    pub description: String,
}

impl FileChunk {
    /// Render the whole chunk as one prompt block.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            out.push_str(&format!("## {}\n```\n{}```\n\n", file.path, file.content));
        }
        out
    }
}

/// Chunking result: ordered chunks plus skip bookkeeping.
#[derive(Debug, Default)]
pub struct ChunkPlan {
    pub chunks: Vec<FileChunk>,
    pub coverage: Coverage,
}

/// Splits a repository's source files into priority-ordered,
/// token-bounded chunks.
pub struct CodeChunker {
    gatherer: ContextGatherer,
    config: ChunkConfig,
}

impl CodeChunker {
    pub fn new(gatherer: ContextGatherer, config: ChunkConfig) -> Self {
        Self {
            gatherer,
            config: config.sanitized(),
        }
    }

    /// Build chunks, capped at `max_chunks`. Candidates are sorted by the
    /// shared priority maps; the current chunk closes when either the token
    /// or the file cap would be exceeded.
    pub fn chunk(&self, max_chunks: usize) -> Result<ChunkPlan> {
        let mut plan = ChunkPlan::default();
        let mut candidates = self.gatherer.scored_candidates();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut current: Vec<ChunkFile> = Vec::new();
        let mut current_tokens = 0usize;

        for (_, path) in candidates {
            let rel = self.gatherer.rel_path(&path);
            if plan.chunks.len() >= max_chunks {
                plan.coverage.record_skip(&rel, "chunk cap reached");
                continue;
            }
            let raw = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    plan.coverage.record_skip(&rel, format!("unreadable: {e}"));
                    continue;
                }
            };
            let (body, truncated) = truncate_utf8(&raw, PER_FILE_CHAR_CAP);
            let content = if self.config.include_line_numbers {
                numbered(body)
            } else {
                body.to_string()
            };
            let tokens = estimate_tokens(&content);
            if tokens > self.config.max_tokens_per_chunk {
                plan.coverage
                    .record_skip(&rel, "single file exceeds chunk token cap");
                continue;
            }

            let would_overflow = current_tokens + tokens > self.config.max_tokens_per_chunk
                || current.len() >= self.config.max_files_per_chunk;
            if would_overflow && !current.is_empty() {
                self.seal(&mut plan, &mut current, &mut current_tokens);
                if plan.chunks.len() >= max_chunks {
                    plan.coverage.record_skip(&rel, "chunk cap reached");
                    continue;
                }
            }

            plan.coverage
                .record_read(&rel, body.len(), body.lines().count(), truncated);
            current.push(ChunkFile {
                path: rel,
                content,
                truncated,
            });
            current_tokens += tokens;
        }

        if !current.is_empty() && plan.chunks.len() < max_chunks {
            self.seal(&mut plan, &mut current, &mut current_tokens);
        }

        log::info!(
            "Chunked repository into {} chunks ({} files skipped)",
            plan.chunks.len(),
            plan.coverage.files_skipped.len()
        );
        Ok(plan)
    }

    fn seal(&self, plan: &mut ChunkPlan, current: &mut Vec<ChunkFile>, tokens: &mut usize) {
        let files = std::mem::take(current);
        let description = describe(&files);
        plan.chunks.push(FileChunk {
            index: plan.chunks.len(),
            token_estimate: *tokens,
            description,
            files,
        });
        *tokens = 0;
    }
}

impl ContextGatherer {
    /// Scored source candidates for the chunker (same priority maps as the
    /// gatherer's phase 2).
    pub fn scored_candidates(&self) -> Vec<(i32, std::path::PathBuf)> {
        let mut candidates = Vec::new();
        for root in self.analysis_roots() {
            for path in self.walk_source(&root) {
                let rel = self.rel_path(&path);
                candidates.push((scoring::score_file(Path::new(&rel)), path));
            }
        }
        candidates
    }
}

/// Top directories by file count, e.g. `src/handlers (12), src/models (7)`.
fn describe(files: &[ChunkFile]) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        let dir = Path::new(&file.path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        *counts.entry(dir).or_insert(0) += 1;
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
        .into_iter()
        .take(3)
        .map(|(dir, n)| format!("{dir} ({n})"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ContextBudget;
    use crate::gatherer::GatherConfig;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn chunker_for(root: &Path, config: ChunkConfig) -> CodeChunker {
        let gatherer = ContextGatherer::new(
            root,
            Some(Arc::new(ContextBudget::new(80_000))),
            GatherConfig::default(),
        )
        .unwrap();
        CodeChunker::new(gatherer, config)
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let config = ChunkConfig {
            max_tokens_per_chunk: 0,
            max_files_per_chunk: 0,
            include_line_numbers: false,
        }
        .sanitized();
        assert_eq!(config.max_tokens_per_chunk, 30_000);
        assert_eq!(config.max_files_per_chunk, 50);
        assert!(!config.include_line_numbers);
    }

    #[test]
    fn chunks_respect_caps_and_include_each_file_once() {
        let temp = tempdir().unwrap();
        for i in 0..6 {
            fs::write(temp.path().join(format!("file{i}.rs")), "x".repeat(1_000)).unwrap();
        }
        let config = ChunkConfig {
            max_tokens_per_chunk: 700, // ~2 numbered 1000-char files
            max_files_per_chunk: 2,
            include_line_numbers: false,
        };
        let chunker = chunker_for(temp.path(), config.clone());
        let plan = chunker.chunk(10).unwrap();

        assert!(plan.chunks.len() >= 3);
        let mut seen = HashSet::new();
        for chunk in &plan.chunks {
            assert!(chunk.token_estimate <= config.max_tokens_per_chunk);
            assert!(chunk.files.len() <= config.max_files_per_chunk);
            for file in &chunk.files {
                assert!(seen.insert(file.path.clone()), "file appears twice");
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn chunk_cap_records_skips() {
        let temp = tempdir().unwrap();
        for i in 0..4 {
            fs::write(temp.path().join(format!("f{i}.rs")), "y".repeat(2_000)).unwrap();
        }
        let config = ChunkConfig {
            max_tokens_per_chunk: 600,
            max_files_per_chunk: 1,
            include_line_numbers: false,
        };
        let chunker = chunker_for(temp.path(), config);
        let plan = chunker.chunk(2).unwrap();
        assert_eq!(plan.chunks.len(), 2);
        assert!(plan
            .coverage
            .files_skipped
            .iter()
            .any(|s| s.reason == "chunk cap reached"));
    }

    #[test]
    fn descriptions_name_top_directories() {
        let files = vec![
            ChunkFile {
                path: "src/handlers/a.rs".into(),
                content: String::new(),
                truncated: false,
            },
            ChunkFile {
                path: "src/handlers/b.rs".into(),
                content: String::new(),
                truncated: false,
            },
            ChunkFile {
                path: "src/models/c.rs".into(),
                content: String::new(),
                truncated: false,
            },
        ];
        assert_eq!(describe(&files), "src/handlers (2), src/models (1)");
    }

    #[test]
    fn oversized_file_is_truncated_not_dropped() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("big.rs"), "z".repeat(20_000)).unwrap();
        let chunker = chunker_for(temp.path(), ChunkConfig::default());
        let plan = chunker.chunk(4).unwrap();
        assert_eq!(plan.chunks.len(), 1);
        assert!(plan.chunks[0].files[0].truncated);
        assert!(plan.chunks[0].files[0].content.len() < 20_000 + 8 * 600);
    }
}
