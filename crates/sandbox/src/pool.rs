//! Sandbox pool: a fixed-size set of warm sandboxes.
//!
//! The pool is the only component that changes a sandbox's [`HandleState`].
//! Idle sandboxes are counted by a semaphore, so `acquire` waits without
//! polling; every state transition happens under one mutex and no backend
//! call is made while that mutex is held.
//!
//! ```text
//!            acquire              release(Reusable)
//!   Idle ─────────────▶ InUse ─────────────────────▶ Idle
//!                         │
//!                         │ release(Compromised) / lease dropped / stale
//!                         ▼
//!                     Unhealthy ──(health monitor)──▶ destroyed + replaced
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use codemode_core::config::AppConfig;
use codemode_core::{
    Error, ExecutionRequest, ExecutionResult, RandomSelection, Result, SelectionStrategy,
};

use crate::engine::{EnvironmentSpec, SandboxEngine, SandboxId};
use crate::executor::Executor;
use crate::files::FileGateway;
use crate::handle::{HandleInfo, HandleRecord, HandleState, PoolStats};
use crate::health::{HealthMonitor, ReconcileReport};

/// Upper bound on waiting for cancelled executions to hand their sandboxes back.
const FORCED_DRAIN: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Pool settings, fixed for the lifetime of the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub exec_timeout: Duration,
    pub acquire_timeout: Duration,
    pub health_interval: Duration,
    pub shutdown_grace: Duration,
    pub max_output_chars: usize,
    pub reset_workspace_on_release: bool,
    pub environment: EnvironmentSpec,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            exec_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
            max_output_chars: 50_000,
            reset_workspace_on_release: false,
            environment: EnvironmentSpec::default(),
        }
    }
}

impl PoolConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            size: config.pool.size,
            exec_timeout: config.pool.exec_timeout(),
            acquire_timeout: config.pool.acquire_timeout(),
            health_interval: config.pool.health_interval(),
            shutdown_grace: config.pool.shutdown_grace(),
            max_output_chars: config.pool.max_output_chars,
            reset_workspace_on_release: config.pool.reset_workspace_on_release,
            environment: EnvironmentSpec::from_settings(&config.sandbox)?,
        })
    }
}

/// What happens to a sandbox when its lease ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Back to idle. A non-zero exit is still reusable.
    Reusable,
    /// Destroy and replace.
    Compromised,
}

impl ReleaseOutcome {
    /// Timeouts and sandbox failures compromise the sandbox.
    pub fn for_result(result: &ExecutionResult) -> Self {
        if result.error.is_some() {
            Self::Compromised
        } else {
            Self::Reusable
        }
    }

    /// Contract errors (bad path, missing file) leave the sandbox reusable.
    pub fn for_error(error: &Error) -> Self {
        if error.compromises_environment() {
            Self::Compromised
        } else {
            Self::Reusable
        }
    }

    pub(crate) fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Reusable,
            Err(e) => Self::for_error(e),
        }
    }
}

// =============================================================================
// Shared state
// =============================================================================

pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    pub(crate) engine: Arc<dyn SandboxEngine>,
    selector: Arc<dyn SelectionStrategy>,
    pub(crate) handles: Mutex<BTreeMap<SandboxId, HandleRecord>>,
    /// One permit per idle handle.
    pub(crate) idle_permits: Semaphore,
    /// Wakes the health monitor early.
    pub(crate) reclaim: Notify,
    released: Notify,
    /// Refuses new acquisitions and stops the health monitor.
    pub(crate) stopping: CancellationToken,
    /// Parent of every lease's token; fired when the shutdown grace runs out.
    abort: CancellationToken,
    /// Keeps reconcile cycles from overlapping.
    pub(crate) reconcile_lock: Mutex<()>,
}

impl PoolShared {
    pub(crate) fn stats_of(&self, handles: &BTreeMap<SandboxId, HandleRecord>) -> PoolStats {
        PoolStats::from_records(
            self.config.size,
            handles.values(),
            self.stopping.is_cancelled(),
        )
    }

    async fn release_id(&self, id: &SandboxId, mut outcome: ReleaseOutcome) {
        if outcome == ReleaseOutcome::Reusable
            && self.config.reset_workspace_on_release
            && !self.stopping.is_cancelled()
        {
            let root = &self.config.environment.workspace_root;
            if let Err(e) = self.engine.clear_dir(id, root).await {
                tracing::warn!(sandbox = %id, error = %e, "Workspace reset failed");
                outcome = ReleaseOutcome::Compromised;
            }
        }

        let mut handles = self.handles.lock().await;
        let Some(record) = handles.get_mut(id) else {
            tracing::debug!(sandbox = %id, "Released sandbox is no longer tracked");
            return;
        };
        if record.state != HandleState::InUse {
            tracing::warn!(sandbox = %id, state = record.state.as_str(), "Release of a sandbox that was not in use");
            return;
        }

        let reusable =
            outcome == ReleaseOutcome::Reusable && !record.stale && !self.stopping.is_cancelled();
        record.state = if reusable {
            HandleState::Idle
        } else {
            HandleState::Unhealthy
        };
        let stats = self.stats_of(&handles);
        drop(handles);

        if reusable {
            self.idle_permits.add_permits(1);
        } else {
            tracing::info!(sandbox = %id, ?outcome, "Sandbox marked unhealthy");
            self.reclaim.notify_one();
        }
        self.released.notify_waiters();
        crate::metrics::publish_pool_stats(&stats);
    }
}

// =============================================================================
// Lease
// =============================================================================

/// Exclusive use of one sandbox.
///
/// Hand it back with [`SandboxPool::release`]. A lease that is dropped
/// instead (for example because the request future was cancelled) releases
/// its sandbox as compromised.
pub struct SandboxLease {
    shared: Arc<PoolShared>,
    id: SandboxId,
    cancel: CancellationToken,
    armed: bool,
}

impl SandboxLease {
    fn new(shared: Arc<PoolShared>, id: SandboxId) -> Self {
        let cancel = shared.abort.child_token();
        Self {
            shared,
            id,
            cancel,
            armed: true,
        }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn workspace_root(&self) -> &str {
        &self.shared.config.environment.workspace_root
    }

    /// Fires when the pool gives up waiting for this lease during shutdown.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLease").field("id", &self.id).finish()
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let shared = self.shared.clone();
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(sandbox = %id, "Lease dropped without release; reclaiming sandbox");
                runtime.spawn(async move {
                    shared.release_id(&id, ReleaseOutcome::Compromised).await;
                });
            }
            Err(_) => {
                tracing::error!(sandbox = %id, "Lease dropped outside a runtime; sandbox leaked until shutdown");
            }
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Keeps `size` sandboxes warm and hands them out one caller at a time.
pub struct SandboxPool {
    shared: Arc<PoolShared>,
    executor: Executor,
    pub(crate) files: FileGateway,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SandboxPool {
    /// Create a pool that picks idle sandboxes at random. Call [`start`](Self::start) before use.
    pub fn new(engine: Arc<dyn SandboxEngine>, config: PoolConfig) -> Self {
        Self::with_selection(engine, config, Arc::new(RandomSelection))
    }

    pub fn with_selection(
        engine: Arc<dyn SandboxEngine>,
        config: PoolConfig,
        selector: Arc<dyn SelectionStrategy>,
    ) -> Self {
        let executor = Executor::new(engine.clone(), config.max_output_chars);
        let files = FileGateway::new(engine.clone(), config.environment.workspace_root.clone());
        Self {
            shared: Arc::new(PoolShared {
                config,
                engine,
                selector,
                handles: Mutex::new(BTreeMap::new()),
                idle_permits: Semaphore::new(0),
                reclaim: Notify::new(),
                released: Notify::new(),
                stopping: CancellationToken::new(),
                abort: CancellationToken::new(),
                reconcile_lock: Mutex::new(()),
            }),
            executor,
            files,
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn engine(&self) -> Arc<dyn SandboxEngine> {
        self.shared.engine.clone()
    }

    /// Create every sandbox, then start the health monitor.
    ///
    /// Fails if any sandbox cannot be created; the ones that were created are
    /// destroyed first.
    #[tracing::instrument(skip(self), fields(size = self.shared.config.size))]
    pub async fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared.stopping.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return Err(Error::internal("Sandbox pool already started"));
        }

        tracing::info!(
            image = %shared.config.environment.image,
            selection = shared.selector.name(),
            "Pre-warming sandbox pool"
        );
        let results = futures::future::join_all(
            (0..shared.config.size).map(|_| shared.engine.create(&shared.config.environment)),
        )
        .await;

        let mut created = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(id) => created.push(id),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => tracing::warn!(error = %e, "Additional sandbox creation failure"),
            }
        }
        if let Some(e) = failure {
            tracing::error!(error = %e, created = created.len(), "Pool pre-warm failed; destroying partial pool");
            for id in &created {
                if let Err(de) = shared.engine.destroy(id).await {
                    tracing::warn!(sandbox = %id, error = %de, "Failed to destroy sandbox");
                }
            }
            return Err(e);
        }

        let stats = {
            let mut handles = shared.handles.lock().await;
            for id in &created {
                handles.insert(id.clone(), HandleRecord::idle(id.clone()));
            }
            shared.stats_of(&handles)
        };
        shared.idle_permits.add_permits(created.len());
        crate::metrics::publish_pool_stats(&stats);

        *monitor = Some(HealthMonitor::new(shared.clone()).spawn());
        tracing::info!(ready = created.len(), "Sandbox pool ready");
        Ok(())
    }

    /// Take an idle sandbox, waiting until `deadline` for one to free up.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn acquire(&self, deadline: Instant) -> Result<SandboxLease> {
        let shared = &self.shared;
        if shared.stopping.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let started = Instant::now();

        loop {
            let permit =
                match tokio::time::timeout_at(deadline, shared.idle_permits.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_closed)) => return Err(Error::ShuttingDown),
                    Err(_elapsed) => {
                        let waited_ms = started.elapsed().as_millis() as u64;
                        crate::metrics::record_acquire_timeout();
                        tracing::warn!(waited_ms, "No idle sandbox before deadline");
                        return Err(Error::PoolExhausted { waited_ms });
                    }
                };
            permit.forget();

            let mut handles = shared.handles.lock().await;
            let idle: Vec<SandboxId> = handles
                .values()
                .filter(|r| r.state == HandleState::Idle)
                .map(|r| r.id.clone())
                .collect();
            // An empty set means the monitor dropped the handle this permit stood for.
            let Some(id) = shared
                .selector
                .select(idle.len())
                .and_then(|idx| idle.get(idx).cloned())
            else {
                continue;
            };
            if let Some(record) = handles.get_mut(&id) {
                record.state = HandleState::InUse;
                record.uses += 1;
            }
            let stats = shared.stats_of(&handles);
            drop(handles);

            crate::metrics::publish_pool_stats(&stats);
            tracing::debug!(sandbox = %id, "Sandbox acquired");
            return Ok(SandboxLease::new(shared.clone(), id));
        }
    }

    /// Acquire with the configured acquire timeout.
    pub async fn acquire_default(&self) -> Result<SandboxLease> {
        self.acquire(Instant::now() + self.shared.config.acquire_timeout)
            .await
    }

    /// End a lease.
    pub async fn release(&self, mut lease: SandboxLease, outcome: ReleaseOutcome) {
        lease.armed = false;
        lease.shared.release_id(&lease.id, outcome).await;
    }

    pub async fn stats(&self) -> PoolStats {
        let handles = self.shared.handles.lock().await;
        self.shared.stats_of(&handles)
    }

    /// Per-sandbox snapshot, ordered by id.
    pub async fn handles(&self) -> Vec<HandleInfo> {
        let handles = self.shared.handles.lock().await;
        handles.values().map(HandleInfo::from).collect()
    }

    /// Validate, acquire, run and release.
    ///
    /// Rejected requests never touch the pool. Timeouts and sandbox failures
    /// are reported in the result, not as errors.
    #[tracing::instrument(skip(self, request), fields(language = request.language.as_str()))]
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        request.validate()?;
        let lease = self.acquire_default().await?;
        let result = self
            .executor
            .run(&lease, request, self.shared.config.exec_timeout)
            .await;
        self.release(lease, ReleaseOutcome::for_result(&result))
            .await;
        Ok(result)
    }

    /// Run one health-check cycle now.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        HealthMonitor::new(self.shared.clone()).reconcile().await
    }

    /// Stop the pool and destroy every sandbox.
    ///
    /// In-flight executions get `shutdown_grace` to finish; after that they are
    /// cancelled. Safe to call more than once.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if shared.stopping.is_cancelled() {
            return;
        }
        tracing::info!("Shutting down sandbox pool");
        shared.stopping.cancel();
        shared.idle_permits.close();

        if let Some(monitor) = self.monitor.lock().await.take() {
            if let Err(e) = monitor.await {
                tracing::warn!(error = %e, "Health monitor task failed");
            }
        }

        if !self.drain(shared.config.shutdown_grace).await {
            tracing::warn!("Shutdown grace elapsed; cancelling in-flight executions");
            shared.abort.cancel();
            if !self.drain(FORCED_DRAIN).await {
                tracing::warn!("Some leases were not returned; destroying their sandboxes anyway");
            }
        }

        let records = std::mem::take(&mut *shared.handles.lock().await);
        let total = records.len();
        for id in records.into_keys() {
            if let Err(e) = shared.engine.destroy(&id).await {
                tracing::warn!(sandbox = %id, error = %e, "Failed to destroy sandbox during shutdown");
            }
        }
        crate::metrics::publish_pool_stats(&PoolStats {
            target: shared.config.size,
            shutting_down: true,
            ..Default::default()
        });
        tracing::info!(destroyed = total, "Sandbox pool shut down");
    }

    /// Wait until no sandbox is in use. Returns false if `limit` elapsed first.
    async fn drain(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.stats().await.in_use == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

impl Drop for SandboxPool {
    fn drop(&mut self) {
        // Stops the monitor task; sandboxes are only destroyed by `shutdown`.
        self.shared.stopping.cancel();
    }
}
