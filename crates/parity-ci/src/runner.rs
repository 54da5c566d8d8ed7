//! External command execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

/// Result of running one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Rendered command line, for diagnostics.
    pub command: String,

    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: Vec<u8>,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Runs external commands and captures their output.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    /// Per-command timeout; `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Run `command` (first element is the executable) and capture output.
    /// A non-zero exit is not an error here; see [`CommandRunner::run_checked`].
    pub async fn run(&self, command: &[String]) -> anyhow::Result<CommandOutput> {
        let start = Instant::now();

        let Some((exe, args)) = command.split_first() else {
            anyhow::bail!("empty command");
        };
        let rendered = command.join(" ");
        debug!(command = %rendered, "running command");

        let child = Command::new(exe)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {}", exe, e))?;

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "command \"{}\" timed out after {} seconds",
                        rendered,
                        timeout.as_secs()
                    )
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            command: rendered,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run `command` and fail unless it exits with status 0.
    pub async fn run_checked(&self, command: &[String]) -> anyhow::Result<CommandOutput> {
        let output = self.run(command).await?;
        if !output.succeeded() {
            anyhow::bail!(
                "command \"{}\" exited with code {}: {} {}",
                output.command,
                output.exit_code,
                output.stderr.trim(),
                output.stdout_lossy().trim()
            );
        }
        Ok(output)
    }
}

/// Build an owned argv from string slices.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_succeeded() {
        let output = CommandOutput {
            command: "docker version".to_string(),
            exit_code: 0,
            stdout: b"19.03.1".to_vec(),
            stderr: String::new(),
            duration_ms: 10,
        };
        assert!(output.succeeded());
        assert_eq!(output.stdout_lossy(), "19.03.1");
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let output = CommandRunner::new()
            .run(&argv(["echo", "hello"]))
            .await
            .expect("run failed");
        assert!(output.succeeded());
        assert!(output.stdout_lossy().contains("hello"));
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let output = CommandRunner::new()
            .run(&argv(["false"]))
            .await
            .expect("run failed");
        assert!(!output.succeeded());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_run_checked_fails_on_nonzero_exit() {
        let err = CommandRunner::new()
            .run_checked(&argv(["false"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with code"));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        assert!(CommandRunner::new().run(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = CommandRunner::with_timeout(Duration::from_millis(50))
            .run(&argv(["sleep", "5"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_spawn() {
        let err = CommandRunner::new()
            .run(&argv(["definitely-not-a-real-tool-xyz"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
