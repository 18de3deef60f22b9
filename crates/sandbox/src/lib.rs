#![deny(unused)]
//! Sandbox pool for Codemode.
//!
//! This crate keeps a fixed number of isolated Docker containers warm and
//! lends them out one request at a time. Payloads, file reads and file writes
//! all run inside a leased container; the host is never touched directly.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Gateway (HTTP handlers)               │
//! │    ↓ execute / read_file / ...         │
//! ├────────────────────────────────────────┤
//! │  SandboxPool                           │
//! │    acquire → Executor / FileGateway    │
//! │    release → Idle or Unhealthy         │
//! │  HealthMonitor (reconcile loop)        │
//! ├────────────────────────────────────────┤
//! │  Sandbox Engine (DockerSandbox)        │
//! │    ↓ Docker API via bollard            │
//! ├────────────────────────────────────────┤
//! │  Docker Container (isolated)           │
//! │    /workspace  (tmpfs, writable)       │
//! │    No network, no caps, pids limited   │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use codemode_sandbox::{DockerSandbox, PoolConfig, SandboxPool};
//!
//! let engine = Arc::new(DockerSandbox::new()?);
//! let pool = SandboxPool::new(engine, PoolConfig::from_app(&config)?);
//! pool.start().await?;
//!
//! let result = pool.execute(&ExecutionRequest::new("print(1)", Language::Python)).await?;
//! pool.shutdown().await;
//! ```

pub mod engine;
pub mod executor;
pub mod files;
pub mod handle;
pub mod health;
pub mod metrics;
pub mod mock;
pub mod pool;

pub use engine::{
    output_budget, CaptureBuffer, DirEntry, DockerSandbox, EnvironmentSpec, ExecOutput,
    SandboxEngine, SandboxId,
};
pub use executor::{truncate_output, Executor, TRUNCATION_MARKER};
pub use files::{DirListing, FileContent, FileGateway};
pub use handle::{HandleInfo, HandleState, PoolStats};
pub use health::ReconcileReport;
pub use mock::{MockExec, MockSandbox};
pub use pool::{PoolConfig, ReleaseOutcome, SandboxLease, SandboxPool};
