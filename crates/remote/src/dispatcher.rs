//! Remote dispatch: run a command on one of several configured hosts.

use std::sync::Arc;
use std::time::Duration;

use codemode_core::config::RemoteSettings;
use codemode_core::{Error, RandomSelection, Result, SelectionStrategy};

use crate::sanitize::Sanitizer;
use crate::transport::{RemoteOutput, RemoteTransport, SshTransport};

pub struct RemoteDispatcher {
    hosts: Vec<String>,
    transport: Arc<dyn RemoteTransport>,
    selector: Arc<dyn SelectionStrategy>,
    sanitizer: Sanitizer,
}

impl RemoteDispatcher {
    pub fn new(
        hosts: Vec<String>,
        transport: Arc<dyn RemoteTransport>,
        selector: Arc<dyn SelectionStrategy>,
        placeholder: impl Into<String>,
    ) -> Self {
        let hosts: Vec<String> = hosts
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        let sanitizer = Sanitizer::new(&hosts, placeholder);
        Self {
            hosts,
            transport,
            selector,
            sanitizer,
        }
    }

    /// SSH dispatcher with random host choice. `None` when no hosts are configured.
    pub fn from_settings(settings: &RemoteSettings) -> Option<Self> {
        if !settings.enabled() {
            return None;
        }
        let transport = SshTransport::new(
            settings.user.clone(),
            Duration::from_secs(settings.connect_timeout_secs),
            Duration::from_secs(settings.command_timeout_secs),
        );
        Some(Self::new(
            settings.hosts.clone(),
            Arc::new(transport),
            Arc::new(RandomSelection),
            settings.placeholder.clone(),
        ))
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn select_host(&self) -> Result<&str> {
        self.selector
            .select(self.hosts.len())
            .and_then(|idx| self.hosts.get(idx))
            .map(String::as_str)
            .ok_or_else(|| Error::remote("No remote hosts configured"))
    }

    /// Run `command` on `host`. Failures to start are folded into the output's error.
    pub async fn dispatch(&self, command: &str, host: &str) -> RemoteOutput {
        match self.transport.run(host, command).await {
            Ok(output) => output,
            Err(e) => RemoteOutput::failed(e.to_string()),
        }
    }

    pub fn sanitize(&self, message: &str) -> String {
        self.sanitizer.sanitize(message)
    }

    /// Trim, pick a host, run, and scrub host names from everything returned.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, command: &str) -> Result<RemoteOutput> {
        let command = command.trim();
        if command.is_empty() {
            return Err(Error::invalid_request("No command provided"));
        }

        let host = self.select_host()?;
        let raw = self.dispatch(command, host).await;
        let outcome = if raw.is_ok() { "ok" } else { "error" };
        metrics::counter!("codemode_remote_dispatch_total", "outcome" => outcome).increment(1);
        // Host names must not reach logs either.
        tracing::info!(transport = self.transport.name(), outcome, "Remote command finished");

        Ok(RemoteOutput {
            output: self.sanitize(&raw.output),
            error: raw.error.as_deref().map(|e| self.sanitize(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codemode_core::FirstSelection;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(String, String)>>,
        fail_start: bool,
    }

    #[async_trait]
    impl RemoteTransport for RecordingTransport {
        async fn run(&self, host: &str, command: &str) -> Result<RemoteOutput> {
            self.calls
                .lock()
                .await
                .push((host.to_string(), command.to_string()));
            if self.fail_start {
                return Err(Error::remote(format!("ssh: Could not resolve hostname {}", host)));
            }
            Ok(RemoteOutput {
                output: format!("hello from {}\n", host),
                error: Some(format!("Connection to {} closed", host)),
            })
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn dispatcher(transport: Arc<RecordingTransport>) -> RemoteDispatcher {
        RemoteDispatcher::new(
            vec!["10.1.1.1".into(), " ".into(), "10.1.1.2".into()],
            transport,
            Arc::new(FirstSelection),
            "remote_host",
        )
    }

    #[tokio::test]
    async fn test_run_sanitizes_output_and_error() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());

        let out = d.run("  uname -a  ").await.unwrap();
        assert_eq!(out.output, "hello from remote_host\n");
        assert_eq!(out.error.as_deref(), Some("Connection to remote_host closed"));

        let calls = transport.calls.lock().await;
        assert_eq!(calls[0], ("10.1.1.1".to_string(), "uname -a".to_string()));
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let d = dispatcher(transport.clone());

        assert!(matches!(d.run("   ").await, Err(Error::InvalidRequest(_))));
        assert!(transport.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_becomes_sanitized_error() {
        let transport = Arc::new(RecordingTransport {
            fail_start: true,
            ..Default::default()
        });
        let d = dispatcher(transport);

        let out = d.run("ls").await.unwrap();
        assert!(out.output.is_empty());
        let err = out.error.unwrap();
        assert!(err.contains("remote_host"));
        assert!(!err.contains("10.1.1.1"));
    }

    #[test]
    fn test_blank_hosts_are_dropped() {
        let d = dispatcher(Arc::new(RecordingTransport::default()));
        assert_eq!(d.host_count(), 2);
        assert!(RemoteDispatcher::from_settings(&RemoteSettings::default()).is_none());
    }
}
