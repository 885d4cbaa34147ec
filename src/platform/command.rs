//! Bounded external command execution.
//!
//! Every process the platform launches goes through here. The child is
//! owned by the future that waits on it and is spawned with `kill_on_drop`,
//! so a timeout or a cancelled task always takes the process down with it.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, trace};
use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;

use super::PlatformError;

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end(), self.stderr)
        }
    }
}

/// Render a command line for logs and error messages
pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `program args...` and wait at most `limit` for it to exit.
///
/// A non-zero exit is not an error here; callers decide what a failed
/// status means. Only launch failures and timeouts are errors.
pub async fn run_bounded(program: &str, args: &[String], limit: Duration) -> Result<ExecOutput, PlatformError> {
    let rendered = display_command(program, args);
    debug!("exec: {}", rendered);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PlatformError::Spawn {
            command: rendered.clone(),
            source,
        })?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(PlatformError::Spawn {
                command: rendered,
                source,
            })
        }
        // The wait future owned the child; dropping it killed the process.
        Err(_) => return Err(PlatformError::Timeout { command: rendered, limit }),
    };

    let result = ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code(),
    };
    trace!("exec finished ({:?}): {}", result.status, rendered);
    Ok(result)
}

/// Like `run_bounded`, but a non-zero exit becomes `CommandFailed`.
pub async fn run_checked(program: &str, args: &[String], limit: Duration) -> Result<ExecOutput, PlatformError> {
    let output = run_bounded(program, args, limit).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(PlatformError::CommandFailed {
            command: display_command(program, args),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_display_command() {
        assert_eq!(display_command("ip", &args(&["netns", "add", "h1"])), "ip netns add h1");
        assert_eq!(display_command("true", &[]), "true");
    }

    #[test]
    fn test_combined_output() {
        let out = ExecOutput {
            stdout: "a\n".to_string(),
            stderr: "b".to_string(),
            status: Some(1),
        };
        assert_eq!(out.combined(), "a\nb");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_bounded_captures_stdout() {
        let out = run_bounded("sh", &args(&["-c", "echo hello"]), Duration::from_secs(5)).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_bounded_times_out() {
        let err = run_bounded("sleep", &args(&["5"]), Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, PlatformError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_checked_reports_status() {
        let err = run_checked("sh", &args(&["-c", "echo oops >&2; exit 3"]), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            PlatformError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = run_bounded("/nonexistent/fabricbench-tool", &[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PlatformError::Spawn { .. }));
    }
}
