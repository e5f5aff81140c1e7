use crate::budget::estimate_tokens;
use crate::error::Result;
use crate::gatherer::truncate_utf8;
use rusqlite::Connection;
use std::path::Path;

/// Relative location of the persisted symbol index, when one exists.
pub const SYMBOL_DB_PATH: &str = ".taskwing/memory/symbols.db";

const DOC_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct SymbolContextConfig {
    pub max_tokens: usize,
    /// Suppress private symbols from the rendered view.
    pub prefer_public: bool,
}

impl Default for SymbolContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 50_000,
            prefer_public: true,
        }
    }
}

struct SymbolRow {
    name: String,
    file_path: String,
    line: i64,
    signature: String,
    doc: String,
    is_public: bool,
}

/// Canned query sequence, most architecturally significant first.
const SECTIONS: &[(&str, &[&str])] = &[
    ("Entry points", &["main", "init", "run", "start", "serve"]),
    ("Middleware & auth", &["middleware", "auth", "session", "token"]),
    ("Handlers & controllers", &["handler", "controller", "route", "endpoint"]),
    ("Services", &["service", "client", "manager"]),
    ("Models", &["model", "schema", "entity", "record"]),
    ("Error handling", &["error", "err", "fail", "recover"]),
];

/// Compact architectural view rendered from a persisted symbol index.
///
/// Falls back gracefully: an absent database or an empty view means callers
/// revert to raw-file chunking.
pub struct SymbolContext {
    conn: Connection,
}

impl SymbolContext {
    /// Open the symbol index under `repo_root`, if one has been built.
    pub fn open(repo_root: impl AsRef<Path>) -> Result<Option<Self>> {
        let db_path = repo_root.as_ref().join(SYMBOL_DB_PATH);
        if !db_path.exists() {
            log::debug!("No symbol index at {}", db_path.display());
            return Ok(None);
        }
        let conn = Connection::open(&db_path)?;
        Ok(Some(Self { conn }))
    }

    #[cfg(test)]
    fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Render the canned sections in order until the token cap is reached.
    /// Returns `None` when every query came back empty.
    pub fn build(&self, config: &SymbolContextConfig) -> Result<Option<String>> {
        let mut out = String::new();
        let mut used_tokens = 0usize;
        let mut any = false;

        'sections: for (title, patterns) in SECTIONS {
            let rows = self.query_section(patterns, config.prefer_public)?;
            if rows.is_empty() {
                continue;
            }
            let header = format!("## {title}\n\n");
            let header_tokens = estimate_tokens(&header);
            if used_tokens + header_tokens > config.max_tokens {
                break;
            }
            let section_start = out.len();
            out.push_str(&header);
            used_tokens += header_tokens;
            let mut section_rows = 0usize;

            for row in rows {
                let block = format_symbol(&row);
                let tokens = estimate_tokens(&block);
                // Truncate the section rather than drop it outright, but a
                // header with no rows under it gets rolled back.
                if used_tokens + tokens > config.max_tokens {
                    if section_rows == 0 {
                        out.truncate(section_start);
                    }
                    break 'sections;
                }
                out.push_str(&block);
                used_tokens += tokens;
                section_rows += 1;
                any = true;
            }
        }

        if !any {
            return Ok(None);
        }
        Ok(Some(out))
    }

    fn query_section(&self, patterns: &[&str], prefer_public: bool) -> Result<Vec<SymbolRow>> {
        let mut rows = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT name, file_path, line, signature, COALESCE(doc, ''), is_public
             FROM symbols
             WHERE lower(name) LIKE ?1 OR lower(file_path) LIKE ?1
             ORDER BY file_path, line
             LIMIT 40",
        )?;
        for pattern in patterns {
            let like = format!("%{pattern}%");
            let mapped = stmt.query_map([&like], |row| {
                Ok(SymbolRow {
                    name: row.get(0)?,
                    file_path: row.get(1)?,
                    line: row.get(2)?,
                    signature: row.get(3)?,
                    doc: row.get(4)?,
                    is_public: row.get::<_, i64>(5)? != 0,
                })
            })?;
            for row in mapped {
                let row = row?;
                if prefer_public && !row.is_public {
                    continue;
                }
                if rows.iter().any(|r: &SymbolRow| {
                    r.name == row.name && r.file_path == row.file_path && r.line == row.line
                }) {
                    continue;
                }
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

/// `### name (basename:line)` + fenced signature + truncated doc blockquote.
fn format_symbol(row: &SymbolRow) -> String {
    let basename = Path::new(&row.file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| row.file_path.clone());
    let mut block = format!(
        "### {} ({}:{})\n```\n{}\n```\n",
        row.name, basename, row.line, row.signature
    );
    let doc = row.doc.trim();
    if !doc.is_empty() {
        let (snippet, truncated) = truncate_utf8(doc, DOC_SNIPPET_CHARS);
        block.push_str(&format!(
            "> {}{}\n",
            snippet.replace('\n', " "),
            if truncated { "…" } else { "" }
        ));
    }
    block.push('\n');
    block
}
