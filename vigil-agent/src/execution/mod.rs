//! Command execution for the terminal agent
//!
//! Runs the platform reboot command, or the one configured in
//! `reboot_command`, and reports how it went.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::{error, info};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Command execution result
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u128,
}

pub struct CommandExecutor {
    reboot_command: Vec<String>,
}

impl CommandExecutor {
    pub fn new(reboot_override: Option<Vec<String>>) -> Self {
        let reboot_command = reboot_override
            .filter(|argv| !argv.is_empty())
            .unwrap_or_else(platform_reboot_command);
        Self { reboot_command }
    }

    pub fn reboot_command(&self) -> &[String] {
        &self.reboot_command
    }

    pub async fn reboot(&self) -> ExecutionResult {
        info!("Executing reboot: {:?}", self.reboot_command);
        let result = run(&self.reboot_command).await;
        if let Some(e) = &result.error {
            error!("Reboot failed: {}", e);
        }
        result
    }
}

fn platform_reboot_command() -> Vec<String> {
    let argv: &[&str] = if cfg!(target_os = "windows") {
        &["shutdown", "/r", "/t", "0"]
    } else {
        &["sudo", "reboot"]
    };
    argv.iter().map(|s| s.to_string()).collect()
}

/// Runs `argv` with a timeout, never failing: errors land in the result.
pub async fn run(argv: &[String]) -> ExecutionResult {
    let start_time = Instant::now();
    let outcome = run_inner(argv).await;
    let execution_time_ms = start_time.elapsed().as_millis();

    match outcome {
        Ok((output, exit_code)) => ExecutionResult {
            success: exit_code == 0,
            error: (exit_code != 0).then(|| format!("exited with code {exit_code}")),
            output,
            exit_code: Some(exit_code),
            execution_time_ms,
        },
        Err(e) => ExecutionResult {
            success: false,
            output: String::new(),
            error: Some(e.to_string()),
            exit_code: None,
            execution_time_ms,
        },
    }
}

async fn run_inner(argv: &[String]) -> Result<(String, i32)> {
    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("empty command"))?;
    let output = tokio::time::timeout(
        COMMAND_TIMEOUT,
        AsyncCommand::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output(),
    )
    .await
    .context("Command timed out")?
    .with_context(|| format!("Failed to execute {program}"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined_output = if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{}\nSTDERR:\n{}", stdout, stderr)
    };

    Ok((combined_output, output.status.code().unwrap_or(-1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_platform_default_and_override() {
        let default = CommandExecutor::new(None);
        assert!(!default.reboot_command().is_empty());

        let empty_override = CommandExecutor::new(Some(Vec::new()));
        assert_eq!(empty_override.reboot_command(), default.reboot_command());

        let custom = CommandExecutor::new(Some(argv(&["systemctl", "reboot"])));
        assert_eq!(custom.reboot_command(), ["systemctl", "reboot"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reboot_runs_configured_command() {
        let executor = CommandExecutor::new(Some(argv(&["echo", "rebooting"])));
        let result = executor.reboot().await;
        assert!(result.success);
        assert!(result.output.contains("rebooting"));
        assert_eq!(result.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_is_reported() {
        let result = run(&argv(&["false"])).await;
        assert!(!result.success);
        assert!(result.error.is_some());

        let missing = run(&argv(&["/nonexistent/vigil-reboot"])).await;
        assert!(!missing.success);
        assert_eq!(missing.exit_code, None);
    }

    #[tokio::test]
    async fn test_empty_command() {
        let result = run(&[]).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("empty command"));
    }
}
