//! Priority scoring and walk-discipline tables.
//!
//! Lower score = higher priority. Source files score 1-8, config files
//! 110-120, CI files 140-150, so source always outranks config and CI.

use std::path::Path;

/// Directories never descended into during a gather.
pub const IGNORED_SCOPES: &[&str] = &[
    // VCS / tooling
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".husky",
    ".yarn",
    ".npm",
    // caches / builds
    ".cache",
    "node_modules",
    ".next",
    ".turbo",
    ".parcel-cache",
    ".output",
    "build",
    "dist",
    "coverage",
    "storybook-static",
    ".nuxt",
    ".vite",
    ".vercel",
    ".svelte-kit",
    "tmp",
    "target",
    ".terraform",
    ".venv",
    "venv",
    // data / vendor
    "vendor",
    "third_party",
    "third-party",
    "__pycache__",
    ".taskwing",
];

/// Dotdirs that are still worth entering (CI configs live here).
pub const ALLOWED_DOTDIRS: &[&str] = &[".github"];

/// Presence of any of these marks a directory as a monorepo package root.
pub const MANIFEST_MARKERS: &[&str] = &[
    "package.json",
    "go.mod",
    "Cargo.toml",
    "pyproject.toml",
    "pom.xml",
];

/// Canonical entry-point stems collected in phase 1.
pub const ENTRY_POINT_STEMS: &[&str] = &["main", "index", "app", "server"];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "mjs", "cjs", "ts", "tsx", "jsx", "java", "kt", "rb", "php", "cs",
    "c", "h", "cpp", "cc", "hpp", "swift", "scala", "ex", "exs", "zig", "lua",
];

const CONFIG_FILE_NAMES: &[&str] = &[
    "package.json",
    "go.mod",
    "go.sum",
    "cargo.toml",
    "pyproject.toml",
    "pom.xml",
    "tsconfig.json",
    "composer.json",
    "gemfile",
    "makefile",
    "dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
];

const KEYWORD_BOOSTS: &[&str] = &["middleware", "auth", "cors", "rate", "circuit", "error"];

/// True when the extension marks a source file we analyze.
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            SOURCE_EXTENSIONS.iter().any(|c| *c == ext)
        })
        .unwrap_or(false)
}

/// Test files are filtered out of analysis across ecosystems by name shape.
pub fn is_test_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_lowercase(),
        None => return false,
    };
    if name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.contains("_spec.")
        || name.ends_with("_test.go")
    {
        return true;
    }
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("test") | Some("tests") | Some("__tests__") | Some("testdata") | Some("spec")
        )
    })
}

fn is_ci_file(path: &Path) -> Option<i32> {
    let in_workflows = path
        .components()
        .any(|c| matches!(c.as_os_str().to_str(), Some(".github") | Some(".circleci")));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if in_workflows {
        return Some(140);
    }
    match name.as_str() {
        ".gitlab-ci.yml" | ".travis.yml" | "azure-pipelines.yml" => Some(145),
        "jenkinsfile" => Some(150),
        _ => None,
    }
}

fn is_config_file(path: &Path) -> Option<i32> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if CONFIG_FILE_NAMES.iter().any(|c| *c == name) {
        return Some(110);
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") | Some("ini") | Some("cfg") | Some("conf") => Some(115),
        Some("yaml") | Some("yml") | Some("env") | Some("properties") => Some(120),
        _ => None,
    }
}

fn directory_tier(path: &Path) -> Option<i32> {
    let mut best: Option<i32> = None;
    for component in path.components() {
        let Some(name) = component.as_os_str().to_str() else {
            continue;
        };
        let name = name.to_lowercase();
        let tier = match name.as_str() {
            "middleware" | "auth" => 1,
            "handlers" | "handler" | "routes" | "routers" | "router" | "controllers" => 2,
            "errors" | "error" => 3,
            "config" | "models" | "model" => 4,
            "service" | "services" | "repository" | "repositories" => 5,
            "src" | "lib" | "pkg" | "internal" | "app" | "cmd" | "api" | "core" => 6,
            _ => continue,
        };
        best = Some(best.map_or(tier, |b: i32| b.min(tier)));
    }
    best
}

fn basename_tier(path: &Path) -> Option<i32> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let tier = match stem.as_str() {
        "main" | "index" | "app" | "server" => 1,
        s if s.contains("handler") || s.contains("controller") => 2,
        s if s.contains("error") => 3,
        s if s.contains("config") || s.contains("model") => 4,
        _ => return None,
    };
    Some(tier)
}

/// Score a repo-relative path. CI and config files land in their fixed bands;
/// source files combine directory and basename tiers, with a keyword boost
/// pulling security/resilience-relevant files near the front.
pub fn score_file(rel_path: &Path) -> i32 {
    if let Some(score) = is_ci_file(rel_path) {
        return score;
    }
    if let Some(score) = is_config_file(rel_path) {
        return score;
    }

    let dir = directory_tier(rel_path);
    let base = basename_tier(rel_path);
    let mut score = match (dir, base) {
        (Some(d), Some(b)) => d.min(b),
        (Some(d), None) => d,
        (None, Some(b)) => b,
        (None, None) => 8,
    };

    let name = rel_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_lowercase();
    if KEYWORD_BOOSTS.iter().any(|k| name.contains(k)) {
        score = score.min(2);
    }
    score
}

/// Whether a directory name is skipped at walk entry.
pub fn is_ignored_dir(name: &str) -> bool {
    let lowered = name.to_lowercase();
    if IGNORED_SCOPES.iter().any(|s| *s == lowered) {
        return true;
    }
    // dotdirs are skipped except the allow-list
    name.starts_with('.') && !ALLOWED_DOTDIRS.contains(&name)
}
