//! Sandbox execution engine.
//!
//! This module provides the `SandboxEngine` trait and a Docker-based implementation
//! using the `bollard` crate. The sandbox creates isolated Linux containers with
//! strict resource limits, no network access, and a read-only root filesystem.

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use codemode_core::{Error, Result};

/// Label every managed container carries.
pub const MANAGED_BY_LABEL: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "codemode-sandbox";
/// Label scoping containers to one pool instance.
pub const POOL_LABEL: &str = "codemode.pool";

/// Time budget for internal housekeeping commands (file I/O, reset).
const INTERNAL_TIMEOUT: Duration = Duration::from_secs(10);
/// How long streams may keep draining after a cancelled process is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);
/// Raw bytes per write chunk; base64 of this stays well under ARG_MAX per argument.
const WRITE_CHUNK: usize = 64 * 1024;
/// Per-stream capture budget when none is configured.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

const EXIT_NOT_FOUND: i64 = 20;
const EXIT_WRONG_KIND: i64 = 21;

// =============================================================================
// Sandbox Types
// =============================================================================

/// Unique identifier for a sandbox instance.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SandboxId(pub String);

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Everything needed to create one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Image or template identifier.
    pub image: String,
    /// Maximum memory in bytes.
    pub memory_limit: i64,
    /// Fraction of one CPU.
    pub cpu_limit: f64,
    /// Working directory and only writable tree.
    pub workspace_root: String,
    /// Always true for pool-created environments.
    pub network_disabled: bool,
    /// User payloads run as.
    pub user: Option<String>,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            memory_limit: 256 * 1024 * 1024,
            cpu_limit: 1.0,
            workspace_root: "/workspace".to_string(),
            network_disabled: true,
            user: None,
        }
    }
}

impl EnvironmentSpec {
    /// Build from sandbox settings.
    pub fn from_settings(settings: &codemode_core::config::SandboxSettings) -> Result<Self> {
        Ok(Self {
            image: settings.image.clone(),
            memory_limit: settings.memory_limit_bytes()?,
            cpu_limit: settings.cpu_limit,
            workspace_root: settings.workspace_root.clone(),
            network_disabled: true,
            user: settings.user.clone(),
        })
    }
}

/// Raw result of running a command inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was killed through cancellation.
    pub exit_code: Option<i64>,
    /// Whether the cancellation token fired before the process exited.
    pub cancelled: bool,
}

impl ExecOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Byte budget that still yields `max_chars` characters plus one more, so
/// character truncation downstream always sees that the stream was cut.
pub fn output_budget(max_chars: usize) -> usize {
    max_chars.saturating_add(1).saturating_mul(4)
}

/// Keeps the first `limit` bytes of a stream and counts the rest.
#[derive(Debug)]
pub struct CaptureBuffer {
    bytes: Vec<u8>,
    limit: usize,
    dropped: u64,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        let kept = chunk.len().min(room);
        self.bytes.extend_from_slice(&chunk[..kept]);
        self.dropped += (chunk.len() - kept) as u64;
    }

    /// Bytes discarded past the budget.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    /// Name with a trailing `/` for directories.
    pub fn display_name(&self) -> String {
        if self.is_dir {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

// =============================================================================
// Sandbox Engine Trait
// =============================================================================

/// Trait for sandbox execution backends.
///
/// The pool drives every environment's lifecycle through this trait and never
/// touches the substrate directly. File paths passed in are absolute and have
/// already been confined to the workspace root.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Create and start a new environment.
    async fn create(&self, spec: &EnvironmentSpec) -> Result<SandboxId>;

    /// Run `command` (argv, no shell interpolation) inside the environment.
    ///
    /// When `cancel` fires the process is killed and whatever was captured so
    /// far is returned with `cancelled = true`.
    async fn exec(
        &self,
        id: &SandboxId,
        command: &[String],
        workdir: &str,
        cancel: CancellationToken,
    ) -> Result<ExecOutput>;

    /// The authoritative set of environments currently alive.
    async fn list_live(&self) -> Result<HashSet<SandboxId>>;

    /// Destroy the environment. Destroying an unknown environment succeeds.
    async fn destroy(&self, id: &SandboxId) -> Result<()>;

    /// Read a file. Missing files are `FileNotFound`.
    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>>;

    /// Write a file, creating parent directories.
    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()>;

    /// List a directory. Non-directories are `NotADirectory`.
    async fn list_dir(&self, id: &SandboxId, path: &str) -> Result<Vec<DirEntry>>;

    /// Resolve symbolic links in `path`. Missing trailing components are allowed.
    async fn real_path(&self, id: &SandboxId, path: &str) -> Result<String>;

    /// Remove everything below `path`, keeping `path` itself.
    async fn clear_dir(&self, id: &SandboxId, path: &str) -> Result<()>;

    /// Check if the sandbox backend is available (e.g., Docker daemon running).
    async fn is_available(&self) -> bool;

    /// Make sure the image exists locally, pulling it when allowed.
    async fn ensure_image(&self, _image: &str, _pull: bool) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Docker Sandbox Implementation
// =============================================================================

/// Docker-based sandbox engine using the `bollard` crate.
///
/// Creates isolated containers with:
/// - No network access
/// - Read-only root filesystem (tmpfs workspace and `/tmp` only)
/// - Memory and CPU limits
/// - Dropped capabilities and no privilege escalation
pub struct DockerSandbox {
    docker: bollard::Docker,
    /// Value of [`POOL_LABEL`] on every container this engine creates.
    instance: String,
    /// Per-stream byte budget for payload output.
    output_limit: usize,
}

impl DockerSandbox {
    /// Create a new Docker sandbox engine connecting to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::environment(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self::from_client(docker))
    }

    /// Create from an existing bollard Docker client (for testing).
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self {
            docker,
            instance: uuid::Uuid::new_v4().to_string(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Cap what payload execs keep of each stream; the rest is drained and discarded.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Pool instance label value.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Run a housekeeping command that is never cancelled by callers.
    async fn run_internal(&self, id: &SandboxId, command: Vec<String>) -> Result<ExecOutput> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(
            INTERNAL_TIMEOUT,
            self.exec_raw(id, &command, "/", cancel, None, usize::MAX),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(Error::environment(format!(
                "Sandbox {} did not answer within {:?}",
                id, INTERNAL_TIMEOUT
            ))),
        }
    }

    /// Start a command without attaching to its output.
    async fn run_detached(&self, id: &SandboxId, command: Vec<String>) -> Result<()> {
        use bollard::exec::{CreateExecOptions, StartExecOptions};

        let exec = self
            .docker
            .create_exec(
                &id.0,
                CreateExecOptions {
                    cmd: Some(command),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::environment(format!("Failed to create exec in sandbox: {}", e)))?;
        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::environment(format!("Failed to start exec in sandbox: {}", e)))?;
        Ok(())
    }

    /// Kill the process recorded in `pid_file`.
    async fn kill_exec(&self, id: &SandboxId, pid_file: &str) {
        let command = sh(
            r#"[ -f "$1" ] && kill -KILL "$(cat "$1")" 2>/dev/null; rm -f "$1""#,
            &[pid_file],
        );
        if let Err(e) = self.run_detached(id, command).await {
            tracing::warn!(sandbox = %id, error = %e, "Failed to kill cancelled process");
        }
    }

    /// Exec with streaming capture. `pid_file` enables kill-on-cancel.
    async fn exec_raw(
        &self,
        id: &SandboxId,
        command: &[String],
        workdir: &str,
        cancel: CancellationToken,
        pid_file: Option<&str>,
        output_limit: usize,
    ) -> Result<ExecOutput> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(workdir.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&id.0, exec_options)
            .await
            .map_err(|e| Error::environment(format!("Failed to create exec in sandbox: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::environment(format!("Failed to start exec in sandbox: {}", e)))?;

        let mut out = ExecOutput::default();
        let mut stdout = CaptureBuffer::new(output_limit);
        let mut stderr = CaptureBuffer::new(output_limit);

        if let StartExecResults::Attached { mut output, .. } = start_result {
            let drain = tokio::time::sleep(DRAIN_GRACE);
            tokio::pin!(drain);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled(), if !out.cancelled => {
                        out.cancelled = true;
                        if let Some(pid_file) = pid_file {
                            self.kill_exec(id, pid_file).await;
                        }
                        drain.as_mut().reset(tokio::time::Instant::now() + DRAIN_GRACE);
                    }
                    msg = output.next() => match msg {
                        Some(Ok(bollard::container::LogOutput::StdOut { message })) => {
                            stdout.push(&message);
                        }
                        Some(Ok(bollard::container::LogOutput::StdErr { message })) => {
                            stderr.push(&message);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(Error::environment(format!(
                                "Sandbox output stream failed: {}",
                                e
                            )));
                        }
                        None => break,
                    },
                    _ = &mut drain, if out.cancelled => {
                        tracing::warn!(sandbox = %id, "Output did not close after kill");
                        break;
                    }
                }
            }
        }

        if stdout.dropped() + stderr.dropped() > 0 {
            tracing::debug!(
                sandbox = %id,
                stdout_dropped = stdout.dropped(),
                stderr_dropped = stderr.dropped(),
                "Output past the capture budget discarded"
            );
        }
        out.stdout = stdout.into_bytes();
        out.stderr = stderr.into_bytes();

        if out.cancelled {
            return Ok(out);
        }

        // The stream can close a moment before the daemon records the exit code.
        for attempt in 0..3 {
            let inspect = self
                .docker
                .inspect_exec(&exec.id)
                .await
                .map_err(|e| Error::environment(format!("Failed to inspect exec result: {}", e)))?;
            if let Some(code) = inspect.exit_code {
                out.exit_code = Some(code);
                return Ok(out);
            }
            tracing::debug!(sandbox = %id, attempt, "Exit code not yet recorded");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Err(Error::environment("Exec finished without an exit code"))
    }
}

/// `sh -c <script> sh <args...>`: arguments reach the script as `$1..`, never parsed.
fn sh(script: &str, args: &[&str]) -> Vec<String> {
    let mut command = vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        "sh".to_string(),
    ];
    command.extend(args.iter().map(|a| a.to_string()));
    command
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl SandboxEngine for DockerSandbox {
    async fn create(&self, spec: &EnvironmentSpec) -> Result<SandboxId> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, Mount, MountTmpfsOptions, MountTypeEnum};

        let sandbox_id = format!("codemode-sandbox-{}", uuid::Uuid::new_v4());
        let cpu_period = 100_000; // standard 100ms period

        let tmpfs = |target: &str, size: i64| Mount {
            target: Some(target.to_string()),
            typ: Some(MountTypeEnum::TMPFS),
            tmpfs_options: Some(MountTmpfsOptions {
                size_bytes: Some(size),
                mode: Some(0o1777),
                ..Default::default()
            }),
            ..Default::default()
        };

        let host_config = HostConfig {
            memory: Some(spec.memory_limit),
            cpu_quota: Some((spec.cpu_limit * cpu_period as f64) as i64),
            cpu_period: Some(cpu_period),
            network_mode: Some(if spec.network_disabled { "none" } else { "bridge" }.to_string()),
            mounts: Some(vec![
                tmpfs(&spec.workspace_root, spec.memory_limit / 2),
                tmpfs("/tmp", 16 * 1024 * 1024),
            ]),
            readonly_rootfs: Some(true),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            // Prevent fork bombs and too many open files
            pids_limit: Some(128),
            ulimits: Some(vec![bollard::models::ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(1024),
                hard: Some(2048),
            }]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            working_dir: Some(spec.workspace_root.clone()),
            user: spec.user.clone(),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(host_config),
            labels: Some(HashMap::from([
                (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
                (POOL_LABEL.to_string(), self.instance.clone()),
            ])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: sandbox_id.as_str(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| Error::environment(format!("Failed to create sandbox container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container::<String>(&sandbox_id, None)
            .await
        {
            let id = SandboxId(sandbox_id);
            let _ = self.destroy(&id).await;
            return Err(Error::environment(format!(
                "Failed to start sandbox container: {}",
                e
            )));
        }

        tracing::info!(sandbox_id = %sandbox_id, image = %spec.image, "Sandbox container created and started");

        Ok(SandboxId(sandbox_id))
    }

    async fn exec(
        &self,
        id: &SandboxId,
        command: &[String],
        workdir: &str,
        cancel: CancellationToken,
    ) -> Result<ExecOutput> {
        // Record the pid so a cancelled run can be killed from a second exec;
        // `exec "$@"` keeps that pid for the real process.
        let pid_file = format!("/tmp/.codemode-{}.pid", uuid::Uuid::new_v4());
        let mut wrapped = sh(r#"p="$1"; shift; echo $$ > "$p"; exec "$@""#, &[&pid_file]);
        wrapped.extend(command.iter().cloned());

        let out = self
            .exec_raw(id, &wrapped, workdir, cancel, Some(&pid_file), self.output_limit)
            .await?;
        if !out.cancelled {
            let cleanup = vec!["rm".to_string(), "-f".to_string(), pid_file];
            if let Err(e) = self.run_detached(id, cleanup).await {
                tracing::debug!(sandbox = %id, error = %e, "Pid file cleanup failed");
            }
        }
        Ok(out)
    }

    async fn list_live(&self) -> Result<HashSet<SandboxId>> {
        use bollard::container::ListContainersOptions;

        let filters = HashMap::from([(
            "label".to_string(),
            vec![
                format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE),
                format!("{}={}", POOL_LABEL, self.instance),
            ],
        )]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::environment(format!("Failed to list sandbox containers: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter(|c| c.state.as_deref() == Some("running"))
            .flat_map(|c| c.names.unwrap_or_default())
            .map(|name| SandboxId(name.trim_start_matches('/').to_string()))
            .collect())
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        use bollard::container::RemoveContainerOptions;

        // force also kills a running container
        match self
            .docker
            .remove_container(
                &id.0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(sandbox_id = %id, "Sandbox container destroyed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                tracing::debug!(sandbox_id = %id, "Sandbox container already gone");
                Ok(())
            }
            Err(e) => Err(Error::environment(format!(
                "Failed to remove sandbox container: {}",
                e
            ))),
        }
    }

    async fn read_file(&self, id: &SandboxId, path: &str) -> Result<Vec<u8>> {
        // base64 keeps binary content intact across the text stream
        let command = sh(
            r#"[ -e "$1" ] || exit 20; [ -d "$1" ] && exit 21; base64 "$1""#,
            &[path],
        );
        let out = self.run_internal(id, command).await?;

        match out.exit_code {
            Some(0) => {}
            Some(EXIT_NOT_FOUND) => return Err(Error::FileNotFound(path.to_string())),
            Some(EXIT_WRONG_KIND) => {
                return Err(Error::invalid_request(format!("Path is a directory: {}", path)))
            }
            _ => {
                return Err(Error::environment(format!(
                    "Failed to read file '{}' in sandbox: {}",
                    path,
                    out.stderr_lossy()
                )))
            }
        }

        let encoded: Vec<u8> = out
            .stdout
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::environment(format!("Corrupt file transfer for '{}': {}", path, e)))
    }

    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        let mkdir = sh(r#"mkdir -p "$(dirname "$1")""#, &[path]);
        let out = self.run_internal(id, mkdir).await?;
        if out.exit_code != Some(0) {
            return Err(Error::invalid_request(format!(
                "Cannot create parent directory for '{}': {}",
                path,
                out.stderr_lossy().trim()
            )));
        }

        let mut chunks: Vec<&[u8]> = content.chunks(WRITE_CHUNK).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        for (i, chunk) in chunks.into_iter().enumerate() {
            let b64 = base64::engine::general_purpose::STANDARD.encode(chunk);
            let script = if i == 0 {
                r#"printf '%s' "$2" | base64 -d > "$1""#
            } else {
                r#"printf '%s' "$2" | base64 -d >> "$1""#
            };
            let out = self.run_internal(id, sh(script, &[path, &b64])).await?;
            if out.exit_code != Some(0) {
                return Err(Error::environment(format!(
                    "Failed to write file '{}' in sandbox: {}",
                    path,
                    out.stderr_lossy()
                )));
            }
        }

        tracing::debug!(sandbox = %id, path = %path, bytes = content.len(), "File written");
        Ok(())
    }

    async fn list_dir(&self, id: &SandboxId, path: &str) -> Result<Vec<DirEntry>> {
        let command = sh(
            r#"[ -e "$1" ] || exit 20; [ -d "$1" ] || exit 21; ls -1Ap "$1""#,
            &[path],
        );
        let out = self.run_internal(id, command).await?;

        match out.exit_code {
            Some(0) => Ok(parse_listing(&out.stdout_lossy())),
            Some(EXIT_NOT_FOUND) => Err(Error::FileNotFound(path.to_string())),
            Some(EXIT_WRONG_KIND) => Err(Error::NotADirectory(path.to_string())),
            _ => Err(Error::environment(format!(
                "Cannot list path '{}': {}",
                path,
                out.stderr_lossy()
            ))),
        }
    }

    async fn real_path(&self, id: &SandboxId, path: &str) -> Result<String> {
        let out = self
            .run_internal(id, vec!["realpath".into(), "-m".into(), path.into()])
            .await?;
        if out.exit_code != Some(0) {
            return Err(Error::environment(format!(
                "Cannot resolve path '{}': {}",
                path,
                out.stderr_lossy()
            )));
        }
        Ok(out.stdout_lossy().trim_end_matches('\n').to_string())
    }

    async fn clear_dir(&self, id: &SandboxId, path: &str) -> Result<()> {
        let command = sh(
            r#"cd "$1" && find . -mindepth 1 -maxdepth 1 -exec rm -rf {} +"#,
            &[path],
        );
        let out = self.run_internal(id, command).await?;
        if out.exit_code != Some(0) {
            return Err(Error::environment(format!(
                "Failed to clean workspace in sandbox {}: {}",
                id,
                out.stderr_lossy()
            )));
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn ensure_image(&self, image: &str, pull: bool) -> Result<()> {
        use bollard::image::CreateImageOptions;

        if self.docker.inspect_image(image).await.is_ok() {
            tracing::info!(image = %image, "Using local sandbox image");
            return Ok(());
        }
        if !pull {
            return Err(Error::config(format!(
                "Sandbox image {} is not present and pulling is disabled",
                image
            )));
        }

        tracing::info!(image = %image, "Pulling sandbox image");
        let mut progress = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(step) = progress.next().await {
            let info = step.map_err(|e| {
                Error::environment(format!("Failed to pull sandbox image {}: {}", image, e))
            })?;
            if let Some(status) = info.status {
                tracing::debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }
}

/// Parse `ls -1Ap` output.
fn parse_listing(stdout: &str) -> Vec<DirEntry> {
    stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| match line.strip_suffix('/') {
            Some(name) => DirEntry {
                name: name.to_string(),
                is_dir: true,
            },
            None => DirEntry {
                name: line.to_string(),
                is_dir: false,
            },
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_spec_defaults() {
        let spec = EnvironmentSpec::default();
        assert_eq!(spec.image, "python:3.12-slim");
        assert_eq!(spec.memory_limit, 256 * 1024 * 1024);
        assert!(spec.network_disabled);
        assert_eq!(spec.workspace_root, "/workspace");
    }

    #[test]
    fn test_spec_from_settings() {
        let mut settings = codemode_core::config::SandboxSettings::default();
        settings.memory_limit = "1g".into();
        settings.cpu_limit = 0.5;
        let spec = EnvironmentSpec::from_settings(&settings).unwrap();
        assert_eq!(spec.memory_limit, 1024 * 1024 * 1024);
        assert_eq!(spec.cpu_limit, 0.5);
        assert!(spec.network_disabled);
    }

    #[test]
    fn test_sh_passes_arguments_positionally() {
        let cmd = sh(r#"cat "$1""#, &["/workspace/a'; rm -rf /"]);
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[3], "sh");
        assert_eq!(cmd[4], "/workspace/a'; rm -rf /");
        assert_eq!(cmd.len(), 5);
    }

    #[test]
    fn test_parse_listing() {
        let entries = parse_listing("src/\nmain.py\n.hidden\n");
        assert_eq!(
            entries,
            vec![
                DirEntry { name: "src".into(), is_dir: true },
                DirEntry { name: "main.py".into(), is_dir: false },
                DirEntry { name: ".hidden".into(), is_dir: false },
            ]
        );
        assert_eq!(entries[0].display_name(), "src/");
        assert!(parse_listing("").is_empty());
    }

    #[test]
    fn test_capture_buffer_keeps_prefix_and_counts_rest() {
        let mut buf = CaptureBuffer::new(5);
        buf.push(b"abc");
        buf.push(b"defg");
        buf.push(b"hij");
        assert_eq!(buf.dropped(), 5);
        assert_eq!(buf.into_bytes(), b"abcde");

        let mut unlimited = CaptureBuffer::new(usize::MAX);
        unlimited.push(&[b'x'; 4096]);
        assert_eq!(unlimited.dropped(), 0);
        assert_eq!(unlimited.into_bytes().len(), 4096);
    }

    #[test]
    fn test_output_budget_still_triggers_truncation_marker() {
        // Widest case: every character takes four bytes.
        let max_chars = 3;
        let mut buf = CaptureBuffer::new(output_budget(max_chars));
        buf.push("😀".repeat(100).as_bytes());
        assert!(buf.dropped() > 0);

        let text = String::from_utf8_lossy(&buf.into_bytes()).into_owned();
        let (out, cut) = crate::executor::truncate_output(text, max_chars);
        assert!(cut);
        assert_eq!(out, format!("😀😀😀{}", crate::executor::TRUNCATION_MARKER));
    }

    #[test]
    fn test_exec_output_lossy() {
        let out = ExecOutput {
            stdout: vec![b'h', b'i', 0xff],
            stderr: Vec::new(),
            exit_code: Some(0),
            cancelled: false,
        };
        assert_eq!(out.stdout_lossy(), "hi\u{fffd}");
    }
}
