//! Pool bookkeeping for individual sandboxes.

use serde::Serialize;
use std::time::Instant;

use crate::engine::SandboxId;

/// Lifecycle state of a pooled sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Ready to be acquired.
    Idle,
    /// Owned by exactly one lease.
    InUse,
    /// Waiting for the health monitor to destroy and replace it.
    Unhealthy,
    /// Being torn down by the health monitor; the record is dropped once the
    /// backend confirms. Never handed out again and not counted toward the target.
    Destroyed,
}

impl HandleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InUse => "in_use",
            Self::Unhealthy => "unhealthy",
            Self::Destroyed => "destroyed",
        }
    }
}

/// The pool's record of one sandbox. Only the pool mutates it.
#[derive(Debug, Clone)]
pub(crate) struct HandleRecord {
    pub(crate) id: SandboxId,
    pub(crate) state: HandleState,
    /// Set when the backend stopped reporting this sandbox while it was in use.
    pub(crate) stale: bool,
    pub(crate) uses: u64,
    pub(crate) created_at: Instant,
}

impl HandleRecord {
    pub(crate) fn idle(id: SandboxId) -> Self {
        Self {
            id,
            state: HandleState::Idle,
            stale: false,
            uses: 0,
            created_at: Instant::now(),
        }
    }
}

/// Public view of one pooled sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleInfo {
    pub id: SandboxId,
    pub state: HandleState,
    pub stale: bool,
    /// Leases granted so far.
    pub uses: u64,
    pub age_secs: u64,
}

impl From<&HandleRecord> for HandleInfo {
    fn from(record: &HandleRecord) -> Self {
        Self {
            id: record.id.clone(),
            state: record.state,
            stale: record.stale,
            uses: record.uses,
            age_secs: record.created_at.elapsed().as_secs(),
        }
    }
}

/// Snapshot of pool membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub target: usize,
    pub idle: usize,
    pub in_use: usize,
    pub unhealthy: usize,
    pub shutting_down: bool,
}

impl PoolStats {
    /// Handles the pool currently tracks.
    pub fn total(&self) -> usize {
        self.idle + self.in_use + self.unhealthy
    }

    pub(crate) fn from_records<'a>(
        target: usize,
        records: impl Iterator<Item = &'a HandleRecord>,
        shutting_down: bool,
    ) -> Self {
        let mut stats = Self {
            target,
            shutting_down,
            ..Default::default()
        };
        for record in records {
            match record.state {
                HandleState::Idle => stats.idle += 1,
                HandleState::InUse => stats.in_use += 1,
                HandleState::Unhealthy => stats.unhealthy += 1,
                HandleState::Destroyed => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_records() {
        let mut busy = HandleRecord::idle(SandboxId::from("b"));
        busy.state = HandleState::InUse;
        let mut bad = HandleRecord::idle(SandboxId::from("c"));
        bad.state = HandleState::Unhealthy;
        let records = [HandleRecord::idle(SandboxId::from("a")), busy, bad];

        let stats = PoolStats::from_records(3, records.iter(), false);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.unhealthy, 1);
        assert_eq!(stats.total(), 3);
    }
}
