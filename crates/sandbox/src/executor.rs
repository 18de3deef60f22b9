//! Runs one payload inside a leased sandbox.
//!
//! The executor never decides what happens to the sandbox afterwards; it
//! reports the result and [`ReleaseOutcome::for_result`] derives whether the
//! sandbox may be reused.

use std::sync::Arc;
use std::time::{Duration, Instant};

use codemode_core::{ExecutionRequest, ExecutionResult};

use crate::engine::SandboxEngine;
use crate::pool::SandboxLease;

/// Appended to a stream that hit the output cap.
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// How long a killed payload's streams may keep draining past the timeout.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Cut `text` to at most `limit` characters, appending the marker when cut.
///
/// Returns the text unchanged when it already fits.
pub fn truncate_output(text: String, limit: usize) -> (String, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => {
            let mut cut = text;
            cut.truncate(byte_idx);
            cut.push_str(TRUNCATION_MARKER);
            (cut, true)
        }
        None => (text, false),
    }
}

/// Executes payloads with a wall-clock bound and an output cap.
#[derive(Clone)]
pub struct Executor {
    engine: Arc<dyn SandboxEngine>,
    max_output_chars: usize,
}

impl Executor {
    pub fn new(engine: Arc<dyn SandboxEngine>, max_output_chars: usize) -> Self {
        Self {
            engine,
            max_output_chars,
        }
    }

    /// Run `request` in the leased sandbox, killing it after `timeout`.
    ///
    /// Never returns an error: backend faults become an `environment_failure`
    /// result so the caller can release the sandbox as compromised.
    #[tracing::instrument(skip(self, lease, request), fields(sandbox = %lease.id(), language = request.language.as_str()))]
    pub async fn run(
        &self,
        lease: &SandboxLease,
        request: &ExecutionRequest,
        timeout: Duration,
    ) -> ExecutionResult {
        let started = Instant::now();
        let command = request.language.command(&request.code);
        // Child token: the timer only kills this payload, pool shutdown kills all.
        let cancel = lease.cancel_token().child_token();

        let exec = self
            .engine
            .exec(lease.id(), &command, lease.workspace_root(), cancel.clone());
        tokio::pin!(exec);

        let mut timed_out = false;
        let outcome = tokio::select! {
            res = &mut exec => res,
            _ = tokio::time::sleep(timeout) => {
                timed_out = true;
                cancel.cancel();
                match tokio::time::timeout(KILL_GRACE, &mut exec).await {
                    Ok(res) => res,
                    Err(_) => Err(codemode_core::Error::environment(
                        "Payload did not stop after being killed",
                    )),
                }
            }
        };

        let mut result = match outcome {
            Ok(output) if timed_out => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Execution timed out");
                ExecutionResult::timed_out(
                    output.stdout_lossy(),
                    output.stderr_lossy(),
                    timeout.as_millis() as u64,
                )
            }
            Ok(output) => match output.exit_code {
                Some(code) if !output.cancelled => {
                    ExecutionResult::completed(output.stdout_lossy(), output.stderr_lossy(), code)
                }
                _ => {
                    // Cancelled from above: the pool is shutting down.
                    let mut r = ExecutionResult::environment_failure(
                        "Execution cancelled: sandbox pool is shutting down",
                    );
                    r.stdout = output.stdout_lossy();
                    r.stderr = output.stderr_lossy();
                    r
                }
            },
            Err(e) if timed_out => {
                tracing::error!(error = %e, "Timed-out payload could not be reaped");
                ExecutionResult::timed_out(String::new(), String::new(), timeout.as_millis() as u64)
            }
            Err(e) => {
                tracing::error!(error = %e, "Sandbox failed during execution");
                ExecutionResult::environment_failure(format!("Sandbox failure: {}", e))
            }
        };

        let (stdout, out_cut) = truncate_output(std::mem::take(&mut result.stdout), self.max_output_chars);
        let (stderr, err_cut) = truncate_output(std::mem::take(&mut result.stderr), self.max_output_chars);
        result.stdout = stdout;
        result.stderr = stderr;
        result.truncated = out_cut || err_cut;
        result.duration_ms = started.elapsed().as_millis() as u64;

        crate::metrics::record_execution(
            request.language.as_str(),
            result.outcome_label(),
            started.elapsed(),
        );
        tracing::debug!(
            outcome = result.outcome_label(),
            duration_ms = result.duration_ms,
            truncated = result.truncated,
            "Execution finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_below_limit_is_identity() {
        let (out, cut) = truncate_output("hello".to_string(), 5);
        assert_eq!(out, "hello");
        assert!(!cut);

        let (out, cut) = truncate_output(String::new(), 10);
        assert_eq!(out, "");
        assert!(!cut);
    }

    #[test]
    fn test_truncate_above_limit_keeps_exact_prefix() {
        let (out, cut) = truncate_output("abcdefghij".to_string(), 4);
        assert!(cut);
        assert_eq!(out, format!("abcd{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let (out, cut) = truncate_output(text, 3);
        assert!(cut);
        assert_eq!(out, format!("ééé{}", TRUNCATION_MARKER));
    }
}
