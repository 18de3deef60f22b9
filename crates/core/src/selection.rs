//! Selection strategies for choosing among equally valid candidates.
//!
//! Used by the sandbox pool to pick an idle sandbox and by the remote
//! dispatcher to pick a host. Tests inject [`FirstSelection`] for determinism.

use rand::Rng;

/// Picks one index out of `len` candidates.
pub trait SelectionStrategy: Send + Sync {
    /// Return an index in `0..len`, or `None` when `len == 0`.
    fn select(&self, len: usize) -> Option<usize>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Uniform random choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn select(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(rand::thread_rng().gen_range(0..len))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Always the first candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstSelection;

impl SelectionStrategy for FirstSelection {
    fn select(&self, len: usize) -> Option<usize> {
        (len > 0).then_some(0)
    }

    fn name(&self) -> &'static str {
        "first"
    }
}
