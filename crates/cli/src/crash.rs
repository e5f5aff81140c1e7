//! Crash-log writer: on an unrecoverable panic, serialise the panic value,
//! backtrace, recent prompt and input, platform, and version under
//! `.taskwing/crash_logs/`, keeping a rolling window of files.

use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CRASH_DIR: &str = ".taskwing/crash_logs";
const MAX_CRASH_LOGS: usize = 10;
const PROMPT_CAP: usize = 2_000;
const INPUT_CAP: usize = 500;

static CONTEXT: Mutex<CrashContext> = Mutex::new(CrashContext {
    recent_prompt: String::new(),
    recent_input: String::new(),
});

struct CrashContext {
    recent_prompt: String,
    recent_input: String,
}

/// Record the most recent prompt/input so a later panic report has context.
pub fn record_activity(prompt: &str, input: &str) {
    let mut ctx = CONTEXT.lock().unwrap();
    ctx.recent_prompt = cap(prompt, PROMPT_CAP);
    ctx.recent_input = cap(input, INPUT_CAP);
}

/// Install the panic hook. The previous hook still runs so normal stderr
/// output is preserved.
pub fn install(repo_root: &Path) {
    let root = repo_root.to_path_buf();
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        match write_crash_log(&root, &info.to_string()) {
            Ok(path) => eprintln!(
                "taskwing crashed; details were written to {}",
                path.display()
            ),
            Err(e) => eprintln!("taskwing crashed and the crash log could not be written: {e}"),
        }
        previous(info);
    }));
}

fn write_crash_log(root: &Path, panic_info: &str) -> std::io::Result<PathBuf> {
    let dir = root.join(CRASH_DIR);
    std::fs::create_dir_all(&dir)?;
    prune_old_logs(&dir)?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("crash_{stamp}.log"));
    let ctx = CONTEXT.lock().unwrap();
    let body = format!(
        "taskwing {} on {} {}\n\n== Panic ==\n{}\n\n== Recent prompt ==\n{}\n\n== Recent input ==\n{}\n\n== Backtrace ==\n{}\n",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH,
        panic_info,
        ctx.recent_prompt,
        ctx.recent_input,
        Backtrace::force_capture(),
    );
    std::fs::write(&path, body)?;
    Ok(path)
}

/// Keep the newest `MAX_CRASH_LOGS - 1` so the new file fits the window.
fn prune_old_logs(dir: &Path) -> std::io::Result<()> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("crash_") && n.ends_with(".log"))
        })
        .collect();
    logs.sort();
    while logs.len() >= MAX_CRASH_LOGS {
        let oldest = logs.remove(0);
        let _ = std::fs::remove_file(oldest);
    }
    Ok(())
}

fn cap(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    // Single test over the shared CONTEXT so parallel runs cannot interleave.
    #[test]
    fn crash_log_contains_capped_context_and_platform() {
        let dir = TempDir::new().unwrap();
        let long_input = "i".repeat(5_000);
        record_activity("analyze the retry chain", &long_input);
        {
            let ctx = CONTEXT.lock().unwrap();
            assert_eq!(ctx.recent_input.len(), INPUT_CAP);
        }
        let path = write_crash_log(dir.path(), "panicked at 'boom'").unwrap();
        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("panicked at 'boom'"));
        assert!(body.contains("analyze the retry chain"));
        assert!(body.contains(std::env::consts::OS));
    }

    #[test]
    fn rolling_window_keeps_at_most_ten() {
        let dir = TempDir::new().unwrap();
        let crash_dir = dir.path().join(CRASH_DIR);
        std::fs::create_dir_all(&crash_dir).unwrap();
        for i in 0..15 {
            std::fs::write(crash_dir.join(format!("crash_2026010{}_00000{i}.log", i % 9)), "x")
                .unwrap();
        }
        write_crash_log(dir.path(), "boom").unwrap();
        let count = std::fs::read_dir(&crash_dir).unwrap().count();
        assert!(count <= MAX_CRASH_LOGS);
    }
}
