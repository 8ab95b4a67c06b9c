//! Token refresh via an external login command
//!
//! The Kite login flow (credentials + TOTP + request-token exchange) lives in a
//! sidecar script. This module only runs it and picks the access token out of
//! its stdout.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

use super::TokenRefresher;

#[derive(Deserialize)]
struct LoginOutput {
    access_token: String,
}

/// Runs `sh -c <command>` and expects either `{"access_token": "..."}` or a
/// bare token on stdout.
#[derive(Debug, Clone)]
pub struct CommandTokenRefresher {
    command: String,
    timeout: Duration,
}

impl CommandTokenRefresher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl TokenRefresher for CommandTokenRefresher {
    async fn refresh(&self) -> Result<String> {
        info!("Running Kite login command to refresh access token");
        let output = timeout(
            self.timeout,
            Command::new("sh").arg("-c").arg(&self.command).output(),
        )
        .await
        .context("Kite login command timed out")?
        .context("Failed to spawn Kite login command")?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Kite login command failed: {}", err.trim()));
        }

        extract_access_token(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Used when no login command is configured; every refresh fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoginCommand;

#[async_trait]
impl TokenRefresher for NoLoginCommand {
    async fn refresh(&self) -> Result<String> {
        Err(anyhow!("KITE_LOGIN_CMD is not set, cannot refresh access token"))
    }
}

/// Accepts the sidecar's JSON output or a bare token line
pub fn extract_access_token(stdout: &str) -> Result<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Kite login command produced no output"));
    }

    if trimmed.starts_with('{') {
        let parsed: LoginOutput =
            serde_json::from_str(trimmed).context("Invalid JSON from Kite login command")?;
        return Ok(parsed.access_token);
    }

    trimmed
        .lines()
        .last()
        .map(|line| line.trim().to_string())
        .filter(|token| !token.is_empty() && !token.contains(char::is_whitespace))
        .ok_or_else(|| anyhow!("Unrecognised output from Kite login command"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_access_token() {
        assert_eq!(
            extract_access_token(r#"{"access_token": "abc123", "api_key": "k"}"#).unwrap(),
            "abc123"
        );
        assert_eq!(extract_access_token("logging in...\nxyz789\n").unwrap(), "xyz789");
        assert!(extract_access_token("").is_err());
        assert!(extract_access_token("login failed for user").is_err());
    }

    #[tokio::test]
    async fn test_command_refresher_runs_shell() {
        let refresher = CommandTokenRefresher::new("echo '{\"access_token\":\"fresh\"}'");
        assert_eq!(refresher.refresh().await.unwrap(), "fresh");

        let failing = CommandTokenRefresher::new("echo nope >&2; exit 3");
        assert!(failing.refresh().await.is_err());

        assert!(NoLoginCommand.refresh().await.is_err());
    }
}
