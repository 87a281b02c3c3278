//! Subprocess execution for CLI-backed assistants.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use crate::domain::InvocationError;

/// Lines of stderr kept in a `NonZeroExit` error.
const STDERR_TAIL_LINES: usize = 20;

/// Captured result of one assistant process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_tail(&self) -> String {
        tail_lines(&self.stderr, STDERR_TAIL_LINES)
    }
}

/// Run `program args...` inside `cwd` with `HOME` pointed at `cwd`.
///
/// The child is spawned kill-on-drop, so dropping this future (timeout or
/// cancellation) terminates the assistant.
pub async fn run_process(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> Result<ProcessOutput, InvocationError> {
    let start = Instant::now();

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env("HOME", cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InvocationError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| InvocationError::Spawn {
            program: program.to_string(),
            message: e.to_string(),
        })?;

    let duration_ms = start.elapsed().as_millis() as u64;
    tracing::debug!(
        program = %program,
        exit_code = ?output.status.code(),
        duration_ms = duration_ms,
        "assistant process exited"
    );

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        duration_ms,
    })
}

/// Locate `program` on `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_in_working_dir_with_home() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_process(
            "sh",
            &["-c".to_string(), "pwd; echo $HOME".to_string()],
            dir.path(),
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        assert!(out.success());
        let lines: Vec<&str> = out.stdout.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_process(
            "sh",
            &["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            dir.path(),
            &BTreeMap::new(),
        )
        .await
        .unwrap();

        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr_tail(), "oops");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_process(
            "metacoder-no-such-program-xyz",
            &[],
            dir.path(),
            &BTreeMap::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InvocationError::Spawn { .. }));
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(tail_lines("a", 5), "a");
        assert_eq!(tail_lines("", 5), "");
    }

    #[test]
    fn test_find_on_path_misses_unknown() {
        assert!(find_on_path("metacoder-no-such-program-xyz").is_none());
    }
}
