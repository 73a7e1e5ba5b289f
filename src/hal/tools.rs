use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::traits::ToolRunner;

/// Paths and limits for the external audio tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Device listing tool
    pub aplay: String,
    /// Mixer control tool
    pub amixer: String,
    pub timeout_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            aplay: "aplay".to_string(),
            amixer: "amixer".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Runs tools as real subprocesses
pub struct SystemToolRunner {
    timeout: Duration,
}

impl SystemToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemToolRunner {
    fn default() -> Self {
        Self::new(ToolConfig::default().timeout())
    }
}

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(program, error = %e, "tool unavailable");
                return None;
            }
            Err(_) => {
                tracing::warn!(program, timeout_ms = self.timeout.as_millis() as u64, "tool timed out");
                return None;
            }
        };

        if !output.status.success() {
            tracing::debug!(
                program,
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tool exited with failure"
            );
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn read_file(&self, path: &str) -> Option<String> {
        match tokio::time::timeout(self.timeout, tokio::fs::read_to_string(path)).await {
            Ok(Ok(contents)) => Some(contents),
            _ => None,
        }
    }
}
