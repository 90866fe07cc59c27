//! Subprocess execution for the external converters.
//!
//! Every converter call goes through [`run_tool`]: stdin closed, output
//! captured, bounded by a timeout. `kill_on_drop` ties the child's lifetime to
//! the future, so a timed-out or abandoned request does not leave an Inkscape
//! process behind.

use crate::error::ExportError;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 400;

/// Run a converter to completion.
///
/// # Errors
/// - [`ExportError::ToolNotFound`] — the executable does not exist
/// - [`ExportError::ConverterTimedOut`] — still running after `timeout_secs`
/// - [`ExportError::ConversionFailure`] — could not spawn, or non-zero exit
pub async fn run_tool(
    tool: &'static str,
    mut cmd: Command,
    timeout_secs: u64,
) -> Result<Output, ExportError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    debug!("Running {}: {:?}", tool, cmd.as_std());
    let start = Instant::now();

    let result = timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
    let output = match result {
        Err(_) => {
            return Err(ExportError::ConverterTimedOut {
                tool,
                secs: timeout_secs,
            })
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExportError::ToolNotFound(format!(
                "{tool} executable '{program}' not found"
            )))
        }
        Ok(Err(e)) => {
            return Err(ExportError::ConversionFailure {
                tool,
                detail: format!("failed to start: {e}"),
            })
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(ExportError::ConversionFailure {
            tool,
            detail: format!("{}: {}", output.status, stderr_excerpt(&output.stderr)),
        });
    }

    debug!("{} finished in {}ms", tool, start.elapsed().as_millis());
    Ok(output)
}

/// Check that a converter actually wrote a non-empty file at `path`.
///
/// Some converters exit 0 after printing an error, so a zero exit status
/// alone does not prove there is output.
pub async fn expect_output(tool: &'static str, path: &Path) -> Result<u64, ExportError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(ExportError::ConversionFailure {
            tool,
            detail: format!("produced an empty file '{}'", path.display()),
        }),
        Err(_) => Err(ExportError::ConversionFailure {
            tool,
            detail: format!("produced no output at '{}'", path.display()),
        }),
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "no error output".to_string();
    }
    if text.chars().count() > STDERR_EXCERPT {
        let cut: String = text.chars().take(STDERR_EXCERPT).collect();
        format!("{cut}\u{2026}")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_returns_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello"]);
        let out = run_tool("sh", cmd, 5).await.unwrap();
        assert_eq!(out.stdout, b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_conversion_failure_with_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 'bad svg' >&2; exit 3"]);
        let err = run_tool("sh", cmd, 5).await.unwrap_err();
        match err {
            ExportError::ConversionFailure { tool, detail } => {
                assert_eq!(tool, "sh");
                assert!(detail.contains("bad svg"), "got: {detail}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_command_times_out() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let err = run_tool("sh", cmd, 1).await.unwrap_err();
        assert!(matches!(err, ExportError::ConverterTimedOut { secs: 1, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_executable_is_tool_not_found() {
        let cmd = Command::new("/nonexistent/inkscape-for-tests");
        let err = run_tool("inkscape", cmd, 5).await.unwrap_err();
        assert!(matches!(err, ExportError::ToolNotFound(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_or_missing_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("out.png");
        assert!(expect_output("inkscape", &missing).await.is_err());

        std::fs::write(&missing, b"").unwrap();
        assert!(expect_output("inkscape", &missing).await.is_err());

        std::fs::write(&missing, b"\x89PNG").unwrap();
        assert_eq!(expect_output("inkscape", &missing).await.unwrap(), 4);
    }

    #[test]
    fn long_stderr_is_truncated() {
        let long = "x".repeat(1000);
        let excerpt = stderr_excerpt(long.as_bytes());
        assert!(excerpt.chars().count() <= STDERR_EXCERPT + 1);
        assert_eq!(stderr_excerpt(b"  \n"), "no error output");
    }
}
