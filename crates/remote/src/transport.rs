//! Transports that run a command on a remote host.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;

use codemode_core::{Error, Result};

/// Combined output of one remote command plus an error indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteOutput {
    /// Stdout followed by stderr.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteOutput {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run `command` on `host`. `Err` means the command never ran.
    async fn run(&self, host: &str, command: &str) -> Result<RemoteOutput>;

    fn name(&self) -> &'static str;
}

// =============================================================================
// SSH
// =============================================================================

/// Runs commands through the system `ssh` client as one application user.
#[derive(Debug, Clone)]
pub struct SshTransport {
    user: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshTransport {
    pub fn new(user: impl Into<String>, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            user: user.into(),
            connect_timeout,
            command_timeout,
        }
    }

    fn args(&self, host: &str, command: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            format!("{}@{}", self.user, host),
            "--".to_string(),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn run(&self, host: &str, command: &str) -> Result<RemoteOutput> {
        let args = self.args(host, command);
        tracing::debug!(user = %self.user, "Dispatching remote command");

        let output = tokio::time::timeout(
            self.command_timeout,
            tokio::process::Command::new("ssh")
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match output {
            Ok(res) => res.map_err(|e| Error::remote(format!("Failed to start ssh on {}: {}", host, e)))?,
            Err(_) => {
                return Ok(RemoteOutput::failed(format!(
                    "Remote command on {} timed out after {}s",
                    host,
                    self.command_timeout.as_secs()
                )))
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let error = if output.status.success() {
            None
        } else {
            Some(match output.status.code() {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            })
        };
        Ok(RemoteOutput {
            output: combined,
            error,
        })
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_args_pass_command_as_one_argument() {
        let t = SshTransport::new("coderunner", Duration::from_secs(10), Duration::from_secs(60));
        let args = t.args("10.0.0.1", "ls -la; echo done");
        assert_eq!(args[4], "coderunner@10.0.0.1");
        assert_eq!(args[5], "--");
        assert_eq!(args[6], "ls -la; echo done");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
    }
}
