//! Health monitor: keeps the pool's view in line with what actually runs.
//!
//! Each cycle diffs the backend's live set against the pool's records,
//! destroys what is unhealthy and creates replacements until the pool is back
//! at its target size. A failed cycle is logged and retried on the next tick.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use codemode_core::Result;

use crate::engine::SandboxId;
use crate::handle::{HandleRecord, HandleState};
use crate::pool::PoolShared;

/// What one reconcile cycle changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Idle sandboxes that vanished from the backend.
    pub dropped: usize,
    /// In-use sandboxes that vanished; they are retired on release.
    pub stale: usize,
    pub destroyed: usize,
    pub created: usize,
    pub failed_creates: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) struct HealthMonitor {
    shared: Arc<PoolShared>,
}

impl HealthMonitor {
    pub(crate) fn new(shared: Arc<PoolShared>) -> Self {
        Self { shared }
    }

    /// Run until the pool starts stopping.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.shared.config.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the pool was just filled.
        ticker.tick().await;

        tracing::debug!(
            interval_secs = self.shared.config.health_interval.as_secs(),
            "Health monitor started"
        );
        loop {
            tokio::select! {
                _ = self.shared.stopping.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.shared.reclaim.notified() => {}
            }

            match self.reconcile().await {
                Ok(report) if report.is_noop() => {}
                Ok(report) => tracing::info!(?report, "Pool reconciled"),
                Err(e) => tracing::warn!(error = %e, "Health check failed; retrying next cycle"),
            }
        }
        tracing::debug!("Health monitor stopped");
    }

    #[tracing::instrument(skip(self))]
    pub(crate) async fn reconcile(&self) -> Result<ReconcileReport> {
        let shared = &self.shared;
        let _cycle = shared.reconcile_lock.lock().await;
        let mut report = ReconcileReport::default();
        if shared.stopping.is_cancelled() {
            return Ok(report);
        }

        let live = shared.engine.list_live().await?;

        let (to_destroy, deficit, stats) = {
            let mut handles = shared.handles.lock().await;
            let mut to_destroy: Vec<SandboxId> = Vec::new();
            let ids: Vec<SandboxId> = handles.keys().cloned().collect();

            for id in ids {
                let alive = live.contains(&id);
                let Some(record) = handles.get_mut(&id) else {
                    continue;
                };
                let state = record.state;
                match state {
                    HandleState::InUse => {
                        if !alive && !record.stale {
                            tracing::warn!(sandbox = %id, "In-use sandbox disappeared");
                            record.stale = true;
                            report.stale += 1;
                        }
                    }
                    HandleState::Idle if !alive => {
                        tracing::warn!(sandbox = %id, "Idle sandbox disappeared");
                        record.state = HandleState::Destroyed;
                        // Fails only while an acquirer holds the permit; it re-selects.
                        if let Ok(permit) = shared.idle_permits.try_acquire() {
                            permit.forget();
                        }
                        report.dropped += 1;
                        to_destroy.push(id);
                    }
                    HandleState::Unhealthy => {
                        record.state = HandleState::Destroyed;
                        to_destroy.push(id);
                    }
                    // A previous destroy failed; try again.
                    HandleState::Destroyed => to_destroy.push(id),
                    HandleState::Idle => {}
                }
            }

            let kept = handles
                .values()
                .filter(|r| r.state != HandleState::Destroyed)
                .count();
            let deficit = shared.config.size.saturating_sub(kept);
            (to_destroy, deficit, shared.stats_of(&handles))
        };
        crate::metrics::publish_pool_stats(&stats);

        let mut gone = Vec::with_capacity(to_destroy.len());
        for id in to_destroy {
            match shared.engine.destroy(&id).await {
                Ok(()) => gone.push(id),
                Err(e) => tracing::warn!(sandbox = %id, error = %e, "Failed to destroy sandbox"),
            }
        }
        if !gone.is_empty() {
            let mut handles = shared.handles.lock().await;
            for id in &gone {
                handles.remove(id);
            }
            report.destroyed = gone.len();
        }

        for _ in 0..deficit {
            if shared.stopping.is_cancelled() {
                break;
            }
            let id = match shared.engine.create(&shared.config.environment).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create replacement sandbox");
                    report.failed_creates += 1;
                    break;
                }
            };

            let mut handles = shared.handles.lock().await;
            if shared.stopping.is_cancelled() {
                drop(handles);
                if let Err(e) = shared.engine.destroy(&id).await {
                    tracing::warn!(sandbox = %id, error = %e, "Failed to destroy sandbox");
                }
                break;
            }
            handles.insert(id.clone(), HandleRecord::idle(id.clone()));
            let stats = shared.stats_of(&handles);
            drop(handles);

            shared.idle_permits.add_permits(1);
            crate::metrics::record_replacement();
            crate::metrics::publish_pool_stats(&stats);
            report.created += 1;
            tracing::info!(sandbox = %id, "Replacement sandbox created");
        }

        Ok(report)
    }
}
