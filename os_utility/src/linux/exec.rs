use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use cluster_shared_types::Result;
use os_utility_interface::{CommandOutput, Exec, OsUtilError};

/// Runs host binaries through `tokio::process`, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct LiveExec {
    command_timeout: Duration,
}

impl LiveExec {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn spawn(&self, name: &str, env: &[(&str, &str)], args: &[&str]) -> Result<CommandOutput> {
        let cmd_str = format!("{} {}", name, args.join(" "));

        let mut command = Command::new(name);
        command
            .args(args)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| OsUtilError::Timeout(cmd_str.clone()))?
            .map_err(|e| OsUtilError::CommandFailed {
                command: cmd_str.clone(),
                message: e.to_string(),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        // Killed by a signal when there is no code.
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(command = %cmd_str, exit_code, "Command finished");

        Ok(CommandOutput {
            exit_code,
            output: combined,
        })
    }
}

#[async_trait]
impl Exec for LiveExec {
    async fn command(&self, name: &str, env: &[(&str, &str)], args: &[&str]) -> Result<CommandOutput> {
        info!(name, args = ?args, "Running command");
        self.spawn(name, env, args).await
    }

    async fn command_with_no_logging(
        &self,
        name: &str,
        env: &[(&str, &str)],
        args: &[&str],
    ) -> Result<CommandOutput> {
        self.spawn(name, env, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let exec = LiveExec::new(Duration::from_secs(5));
        let out = exec
            .command("sh", &[("GREETING", "hello")], &["-c", "echo $GREETING; exit 3"])
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.output.trim(), "hello");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let exec = LiveExec::new(Duration::from_secs(5));
        let result = exec
            .command_with_no_logging("definitely-not-a-real-binary", &[], &[])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = LiveExec::new(Duration::from_millis(50));
        let err = exec.command("sleep", &[], &["5"]).await.unwrap_err();
        assert!(err.to_string().contains("Timeout"));
    }
}
