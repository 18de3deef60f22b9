use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxSettings,
    pub pool: PoolSettings,
    pub remote: RemoteSettings,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// How each sandbox environment is created.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    /// Image (or template) the environments are created from.
    pub image: String,
    /// Memory ceiling, e.g. `"256m"`, `"1g"` or plain bytes.
    pub memory_limit: String,
    /// Fraction of one CPU (1.0 = one core).
    pub cpu_limit: f64,
    /// The only directory tree file operations may touch.
    pub workspace_root: String,
    /// Pull the image at startup when it is not present locally.
    pub pull_image: bool,
    /// User to run payloads as. `None` keeps the image default.
    pub user: Option<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".into(),
            memory_limit: "256m".into(),
            cpu_limit: 1.0,
            workspace_root: "/workspace".into(),
            pull_image: true,
            user: None,
        }
    }
}

impl SandboxSettings {
    /// Memory ceiling in bytes.
    pub fn memory_limit_bytes(&self) -> Result<i64> {
        parse_memory_limit(&self.memory_limit)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of environments kept alive.
    pub size: usize,
    pub exec_timeout_secs: u64,
    /// Per-stream output cap, in characters.
    pub max_output_chars: usize,
    /// How long a caller waits for a free environment.
    pub acquire_timeout_secs: u64,
    pub health_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Wipe the workspace every time an environment is returned to the pool.
    pub reset_workspace_on_release: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 2,
            exec_timeout_secs: 30,
            max_output_chars: 50_000,
            acquire_timeout_secs: 30,
            health_interval_secs: 10,
            shutdown_grace_secs: 10,
            reset_workspace_on_release: false,
        }
    }
}

impl PoolSettings {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteSettings {
    /// Hosts commands may be dispatched to. Empty disables remote dispatch.
    pub hosts: Vec<String>,
    /// Application identity used to log in on the remote hosts.
    pub user: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Replacement for host identifiers in text returned to callers.
    pub placeholder: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            user: "coderunner".into(),
            connect_timeout_secs: 10,
            command_timeout_secs: 60,
            placeholder: "remote_host".into(),
        }
    }
}

impl RemoteSettings {
    pub fn enabled(&self) -> bool {
        self.hosts.iter().any(|h| !h.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub json_logs: bool,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_filter: "info".into(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let env = std::env::var("CODEMODE_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map CODEMODE__POOL__SIZE=4 to pool.size
            .add_source(
                Environment::with_prefix("CODEMODE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(";")
                    .with_list_parse_key("remote.hosts"),
            )
            .build()
            .map_err(|e| Error::config(e.to_string()))?;

        let config: Self = s
            .try_deserialize()
            .map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(Error::config("pool.size must be at least 1"));
        }
        if self.pool.exec_timeout_secs == 0 {
            return Err(Error::config("pool.exec_timeout_secs must be positive"));
        }
        if self.pool.health_interval_secs == 0 {
            return Err(Error::config("pool.health_interval_secs must be positive"));
        }
        if self.pool.max_output_chars == 0 {
            return Err(Error::config("pool.max_output_chars must be positive"));
        }
        if !self.sandbox.workspace_root.starts_with('/') {
            return Err(Error::config(format!(
                "sandbox.workspace_root must be absolute, got {}",
                self.sandbox.workspace_root
            )));
        }
        if self.sandbox.image.trim().is_empty() {
            return Err(Error::config("sandbox.image must not be empty"));
        }
        if !(self.sandbox.cpu_limit > 0.0) {
            return Err(Error::config("sandbox.cpu_limit must be positive"));
        }
        self.sandbox.memory_limit_bytes()?;
        Ok(())
    }
}

/// Parse a Docker-style memory size (`512k`, `256m`, `1g`, `1048576`).
pub fn parse_memory_limit(raw: &str) -> Result<i64> {
    let s = raw.trim().to_ascii_lowercase();
    let s = s.strip_suffix('b').unwrap_or(&s);
    let (digits, multiplier) = match s.chars().last() {
        Some('k') => (&s[..s.len() - 1], 1024),
        Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };

    let value: i64 = digits
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid memory limit: {}", raw)))?;
    if value <= 0 {
        return Err(Error::config(format!("memory limit must be positive: {}", raw)));
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::config(format!("memory limit overflows: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.exec_timeout_secs, 30);
        assert_eq!(config.pool.max_output_chars, 50_000);
        assert_eq!(config.sandbox.image, "python:3.12-slim");
        assert_eq!(config.sandbox.workspace_root, "/workspace");
        assert!(!config.remote.enabled());
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("256m").unwrap(), 256 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512kb").unwrap(), 512 * 1024);
        assert_eq!(parse_memory_limit("1048576").unwrap(), 1_048_576);
        assert!(parse_memory_limit("lots").is_err());
        assert!(parse_memory_limit("0m").is_err());
        assert!(parse_memory_limit("").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.pool.size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sandbox.workspace_root = "workspace".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sandbox.cpu_limit = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sandbox.memory_limit = "huge".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let source = Config::builder()
            .set_override("pool.size", 5)
            .unwrap()
            .set_override("remote.hosts", vec!["10.0.0.1", "10.0.0.2"])
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = source.try_deserialize().unwrap();
        assert_eq!(config.pool.size, 5);
        assert_eq!(config.pool.exec_timeout_secs, 30);
        assert_eq!(config.remote.hosts.len(), 2);
        assert!(config.remote.enabled());
    }
}
