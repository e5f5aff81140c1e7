//! Whitelisted tool surface for the ReAct agent.
//!
//! Every tool is scoped to the repository root, rejects upward path
//! traversal, and caps its output. `exec_command` runs a short whitelist of
//! binaries directly, never through a shell.

use crate::error::{AgentError, Result};
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use taskwing_gather::scoring::is_ignored_dir;
use taskwing_gather::numbered;
use taskwing_llm::{LlmError, ToolSpec};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_LINES: usize = 500;
const MAX_GREP_MATCHES: usize = 50;
const MAX_LIST_ITEMS: usize = 150;
const MAX_STDOUT_CHARS: usize = 10_000;

const ALLOWED_COMMANDS: &[&str] = &["git", "head", "tail", "wc", "find"];

/// Default include globs for grep when the model does not narrow the search.
const GREP_INCLUDES: &[&str] = &[
    "*.rs", "*.go", "*.py", "*.ts", "*.tsx", "*.js", "*.java", "*.rb", "*.c", "*.cc", "*.cpp",
    "*.h", "*.toml", "*.yaml", "*.yml", "*.json", "*.md",
];
const GREP_EXCLUDE_DIRS: &[&str] = &[".git", "node_modules", "target", "vendor", "dist", "build"];

/// Repo-scoped tool dispatcher for agent tool calls.
pub struct ToolBox {
    root: PathBuf,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    max_lines: Option<usize>,
}

#[derive(Deserialize)]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    include: Option<String>,
}

#[derive(Deserialize)]
struct ListDirArgs {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    max_depth: Option<usize>,
}

#[derive(Deserialize)]
struct ExecArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

impl ToolBox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Tool schemas advertised to the model.
    pub fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "read_file".into(),
                description: "Read a file from the repository with line numbers".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Repo-relative file path"},
                        "max_lines": {"type": "integer", "default": DEFAULT_MAX_LINES}
                    },
                    "required": ["path"]
                }),
            },
            ToolSpec {
                name: "grep_search".into(),
                description: "Search file contents for a pattern".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "pattern": {"type": "string"},
                        "path": {"type": "string", "description": "Subdirectory to search"},
                        "include": {"type": "string", "description": "Filename glob, e.g. *.rs"}
                    },
                    "required": ["pattern"]
                }),
            },
            ToolSpec {
                name: "list_dir".into(),
                description: "List a directory tree with file sizes".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "max_depth": {"type": "integer", "default": 2}
                    }
                }),
            },
            ToolSpec {
                name: "exec_command".into(),
                description: "Run a whitelisted command (git, head, tail, wc, find)".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "enum": ALLOWED_COMMANDS},
                        "args": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["command"]
                }),
            },
        ]
    }

    pub async fn dispatch(
        &self,
        ctx: &CancellationToken,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<String> {
        match name {
            "read_file" => {
                let args: ReadFileArgs = parse_args(name, arguments)?;
                self.read_file(&args.path, args.max_lines.unwrap_or(DEFAULT_MAX_LINES))
            }
            "grep_search" => {
                let args: GrepArgs = parse_args(name, arguments)?;
                self.grep_search(ctx, &args).await
            }
            "list_dir" => {
                let args: ListDirArgs = parse_args(name, arguments)?;
                self.list_dir(args.path.as_deref().unwrap_or(""), args.max_depth.unwrap_or(2))
            }
            "exec_command" => {
                let args: ExecArgs = parse_args(name, arguments)?;
                self.exec_command(ctx, &args.command, &args.args).await
            }
            other => Err(AgentError::ToolRejected {
                tool: other.to_string(),
                reason: "unknown tool".into(),
            }),
        }
    }

    fn resolve(&self, tool: &str, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        let escapes = rel_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes {
            return Err(AgentError::ToolRejected {
                tool: tool.to_string(),
                reason: format!("path traversal in '{rel}'"),
            });
        }
        Ok(self.root.join(rel_path))
    }

    fn read_file(&self, rel: &str, max_lines: usize) -> Result<String> {
        let path = self.resolve("read_file", rel)?;
        let content = std::fs::read_to_string(&path)?;
        let total = content.lines().count();
        let head: String = content
            .lines()
            .take(max_lines)
            .collect::<Vec<_>>()
            .join("\n");
        let mut out = numbered(&head);
        if total > max_lines {
            out.push_str(&format!("... ({} more lines)\n", total - max_lines));
        }
        Ok(out)
    }

    async fn grep_search(&self, ctx: &CancellationToken, args: &GrepArgs) -> Result<String> {
        let search_root = self.resolve("grep_search", args.path.as_deref().unwrap_or(""))?;
        let mut cmd = Command::new("grep");
        cmd.args(["-r", "-n", "-I", "--color=never"]);
        match &args.include {
            Some(glob) => {
                cmd.arg(format!("--include={glob}"));
            }
            None => {
                for glob in GREP_INCLUDES {
                    cmd.arg(format!("--include={glob}"));
                }
            }
        }
        for dir in GREP_EXCLUDE_DIRS {
            cmd.arg(format!("--exclude-dir={dir}"));
        }
        cmd.arg("--").arg(&args.pattern).arg(&search_root);
        let stdout = run_capped(ctx, cmd).await?;

        let root_prefix = format!("{}/", self.root.display());
        let matches: Vec<String> = stdout
            .lines()
            .take(MAX_GREP_MATCHES)
            .map(|l| l.strip_prefix(&root_prefix).unwrap_or(l).to_string())
            .collect();
        if matches.is_empty() {
            return Ok(format!("No matches for '{}'", args.pattern));
        }
        Ok(matches.join("\n"))
    }

    fn list_dir(&self, rel: &str, max_depth: usize) -> Result<String> {
        let start = self.resolve("list_dir", rel)?;
        let mut lines = Vec::new();
        self.walk_dir(&start, 0, max_depth.clamp(1, 6), &mut lines)?;
        if lines.len() > MAX_LIST_ITEMS {
            let extra = lines.len() - MAX_LIST_ITEMS;
            lines.truncate(MAX_LIST_ITEMS);
            lines.push(format!("... ({extra} more entries)"));
        }
        Ok(lines.join("\n"))
    }

    fn walk_dir(
        &self,
        dir: &Path,
        depth: usize,
        max_depth: usize,
        lines: &mut Vec<String>,
    ) -> Result<()> {
        if depth >= max_depth || lines.len() > MAX_LIST_ITEMS {
            return Ok(());
        }
        let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && is_ignored_dir(&name) {
                continue;
            }
            if name.starts_with('.') && name != ".github" {
                continue;
            }
            let indent = "  ".repeat(depth);
            if is_dir {
                lines.push(format!("{indent}{name}/"));
                self.walk_dir(&entry.path(), depth + 1, max_depth, lines)?;
            } else {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                lines.push(format!("{indent}{name} ({size} bytes)"));
            }
        }
        Ok(())
    }

    async fn exec_command(
        &self,
        ctx: &CancellationToken,
        command: &str,
        args: &[String],
    ) -> Result<String> {
        if !ALLOWED_COMMANDS.contains(&command) {
            return Err(AgentError::ToolRejected {
                tool: "exec_command".to_string(),
                reason: format!("command '{command}' is not allowed"),
            });
        }
        for arg in args {
            if arg.contains("..") {
                return Err(AgentError::ToolRejected {
                    tool: "exec_command".to_string(),
                    reason: format!("path traversal in argument '{arg}'"),
                });
            }
        }
        let mut cmd = Command::new(command);
        cmd.args(args).current_dir(&self.root);
        run_capped(ctx, cmd).await
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, value: &serde_json::Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| AgentError::ToolRejected {
        tool: tool.to_string(),
        reason: format!("invalid arguments: {e}"),
    })
}

/// Run a subprocess with cancellation and a stdout cap. grep's exit code 1
/// (no matches) is not an error.
async fn run_capped(ctx: &CancellationToken, mut cmd: Command) -> Result<String> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let output = tokio::select! {
        _ = ctx.cancelled() => return Err(AgentError::Llm(LlmError::Cancelled)),
        out = cmd.output() => out?,
    };
    let code = output.status.code().unwrap_or(-1);
    if code > 1 {
        return Err(AgentError::Subprocess(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let (capped, cut) = taskwing_gather::truncate_utf8(&stdout, MAX_STDOUT_CHARS);
    let mut out = capped.to_string();
    if cut {
        out.push_str("\n... (output truncated)");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn toolbox() -> (TempDir, ToolBox) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn hello() {}\npub fn bye() {}\n").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("node_modules/x/i.js"), "ignored\n").unwrap();
        let toolbox = ToolBox::new(dir.path());
        (dir, toolbox)
    }

    #[tokio::test]
    async fn read_file_rejects_path_traversal() {
        let (_dir, tools) = toolbox();
        let err = tools
            .dispatch(
                &CancellationToken::new(),
                "read_file",
                &json!({"path": "../etc/passwd"}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("path traversal"), "{err}");
    }

    #[tokio::test]
    async fn read_file_numbers_lines_and_caps_length() {
        let (_dir, tools) = toolbox();
        let out = tools
            .dispatch(
                &CancellationToken::new(),
                "read_file",
                &json!({"path": "src/lib.rs", "max_lines": 1}),
            )
            .await
            .unwrap();
        assert!(out.contains("   1 | pub fn hello() {}"));
        assert!(out.contains("(1 more lines)"));
    }

    #[tokio::test]
    async fn exec_rejects_non_whitelisted_binaries() {
        let (_dir, tools) = toolbox();
        let err = tools
            .dispatch(
                &CancellationToken::new(),
                "exec_command",
                &json!({"command": "bash", "args": ["-c", "id"]}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"), "{err}");
    }

    #[tokio::test]
    async fn exec_rejects_traversal_arguments() {
        let (_dir, tools) = toolbox();
        let err = tools
            .dispatch(
                &CancellationToken::new(),
                "exec_command",
                &json!({"command": "head", "args": ["../../etc/passwd"]}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("path traversal"), "{err}");
    }

    #[tokio::test]
    async fn list_dir_skips_ignored_dirs() {
        let (_dir, tools) = toolbox();
        let out = tools
            .dispatch(&CancellationToken::new(), "list_dir", &json!({}))
            .await
            .unwrap();
        assert!(out.contains("src/"));
        assert!(!out.contains("node_modules"));
        assert!(out.contains("bytes"));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let (_dir, tools) = toolbox();
        let err = tools
            .dispatch(&CancellationToken::new(), "rm_rf", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolRejected { .. }));
    }

    #[test]
    fn specs_cover_all_four_tools() {
        let names: Vec<String> = ToolBox::specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["read_file", "grep_search", "list_dir", "exec_command"]);
    }
}
