//! Safe solver (spec §4.7, C10): wraps the native Z3 call with pre-flight resource
//! limits, a wall-clock deadline enforced via a worker thread, and one-shot
//! cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SolverLimits;
use crate::smt::native::{self, NativeStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverStatus {
    Sat,
    Unsat,
    Unknown,
    Timeout,
    Error,
}

/// A query ready to submit: the full SMT-LIB script text plus the counts the
/// pre-flight check validates against [`SolverLimits`] (spec §4.7: "pre-flight limits
/// on variable/assertion/expression-depth/node counts").
#[derive(Debug, Clone)]
pub struct SmtQuery {
    pub script: String,
    pub variable_count: usize,
    pub assertion_count: usize,
    pub max_expr_depth: usize,
    pub node_count: usize,
}

#[derive(Debug, Clone)]
pub struct SafeResult {
    pub status: SolverStatus,
    pub model: Option<String>,
    pub unsat_core_tags: Vec<String>,
    pub reason: Option<String>,
    pub wall_time_ms: u64,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
    pub cancelled: bool,
}

impl SafeResult {
    fn rejected(reason: impl Into<String>) -> Self {
        SafeResult {
            status: SolverStatus::Error,
            model: None,
            unsat_core_tags: vec![],
            reason: None,
            wall_time_ms: 0,
            rejected: true,
            rejection_reason: Some(reason.into()),
            cancelled: false,
        }
    }
}

/// Propagated from the orchestrator through every in-flight solver call; checked once
/// before dispatch (spec §5: "cancellation is a one-shot token... on cancellation:
/// in-flight solver calls return status=unknown, cancelled=true").
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wraps the native Z3 call behind resource limits and a wall-clock deadline.
pub struct SafeSolver {
    limits: SolverLimits,
}

impl SafeSolver {
    pub fn new(limits: SolverLimits) -> Self {
        SafeSolver { limits }
    }

    fn preflight(&self, query: &SmtQuery) -> Option<String> {
        if query.variable_count > self.limits.max_variables {
            return Some(format!(
                "query has {} variables, exceeding the configured limit of {}",
                query.variable_count, self.limits.max_variables
            ));
        }
        if query.assertion_count > self.limits.max_assertions {
            return Some(format!(
                "query has {} assertions, exceeding the configured limit of {}",
                query.assertion_count, self.limits.max_assertions
            ));
        }
        if query.max_expr_depth > self.limits.max_expr_depth {
            return Some(format!(
                "query expression depth {} exceeds the configured limit of {}",
                query.max_expr_depth, self.limits.max_expr_depth
            ));
        }
        if query.node_count > self.limits.max_node_count {
            return Some(format!(
                "query has {} AST nodes, exceeding the configured limit of {}",
                query.node_count, self.limits.max_node_count
            ));
        }
        None
    }

    /// Runs `check-sat` on `query`, failing pre-flight immediately if the query
    /// exceeds the configured limits, otherwise dispatching the blocking Z3 call to a
    /// dedicated worker thread and racing it against `timeout` (spec §4.7). A timed-out
    /// worker is abandoned, not preempted: it keeps running in the background and its
    /// result (if any) is simply never read (spec §5, "Suspension points").
    pub fn check_sat(
        &self,
        query: &SmtQuery,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> SafeResult {
        if let Some(reason) = self.preflight(query) {
            tracing::trace!(reason = %reason, "query rejected pre-flight");
            return SafeResult::rejected(reason);
        }
        if cancellation.is_cancelled() {
            return SafeResult {
                status: SolverStatus::Unknown,
                model: None,
                unsat_core_tags: vec![],
                reason: Some("cancelled before dispatch".to_string()),
                wall_time_ms: 0,
                rejected: false,
                rejection_reason: None,
                cancelled: true,
            };
        }

        let script = query.script.clone();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        std::thread::spawn(move || {
            let outcome = native::run_query(&script);
            // The receiver may already be gone (timed out); a send error here is
            // expected and ignored, never propagated.
            let _ = tx.send(outcome);
        });

        tracing::trace!(timeout_ms = timeout.as_millis() as u64, "dispatching checkSat");

        match rx.recv_timeout(timeout) {
            Ok(outcome) => {
                let wall_time_ms = start.elapsed().as_millis() as u64;
                if let Some(error) = outcome.error {
                    SafeResult {
                        status: SolverStatus::Error,
                        model: None,
                        unsat_core_tags: vec![],
                        reason: Some(error),
                        wall_time_ms,
                        rejected: false,
                        rejection_reason: None,
                        cancelled: false,
                    }
                } else {
                    let status = match outcome.status {
                        NativeStatus::Sat => SolverStatus::Sat,
                        NativeStatus::Unsat => SolverStatus::Unsat,
                        NativeStatus::Unknown => SolverStatus::Unknown,
                    };
                    SafeResult {
                        status,
                        model: outcome.model,
                        unsat_core_tags: outcome.unsat_core_tags,
                        reason: outcome.reason_unknown,
                        wall_time_ms,
                        rejected: false,
                        rejection_reason: None,
                        cancelled: false,
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => SafeResult {
                status: SolverStatus::Timeout,
                model: None,
                unsat_core_tags: vec![],
                reason: Some(format!("exceeded {} ms timeout", timeout.as_millis())),
                wall_time_ms: start.elapsed().as_millis() as u64,
                rejected: false,
                rejection_reason: None,
                cancelled: false,
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => SafeResult {
                status: SolverStatus::Error,
                model: None,
                unsat_core_tags: vec![],
                reason: Some("solver worker thread terminated without a result".to_string()),
                wall_time_ms: start.elapsed().as_millis() as u64,
                rejected: false,
                rejection_reason: None,
                cancelled: false,
            },
        }
    }

    /// Solves the negation of `query` (caller must have already negated the script's
    /// final assertion) and flips `sat`/`unsat` to report validity rather than
    /// satisfiability (spec §4.7: `checkValid`).
    pub fn check_valid(
        &self,
        negated_query: &SmtQuery,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> SafeResult {
        let mut result = self.check_sat(negated_query, timeout, cancellation);
        result.status = match result.status {
            SolverStatus::Sat => SolverStatus::Unsat,
            SolverStatus::Unsat => SolverStatus::Sat,
            other => other,
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(script: &str) -> SmtQuery {
        SmtQuery {
            script: script.to_string(),
            variable_count: 1,
            assertion_count: 1,
            max_expr_depth: 1,
            node_count: 1,
        }
    }

    #[test]
    fn preflight_rejects_too_many_variables() {
        let solver = SafeSolver::new(SolverLimits {
            max_variables: 1,
            ..SolverLimits::default()
        });
        let mut q = query("(check-sat)");
        q.variable_count = 2;
        let result = solver.check_sat(&q, Duration::from_millis(50), &CancellationToken::new());
        assert!(result.rejected);
        assert!(result.rejection_reason.unwrap().contains("variables"));
        assert!(result.wall_time_ms < 5);
    }

    #[test]
    fn satisfiable_query_reports_sat() {
        let solver = SafeSolver::new(SolverLimits::default());
        let q = query("(declare-const x Int) (assert (> x 0)) (check-sat)");
        let result = solver.check_sat(&q, Duration::from_secs(5), &CancellationToken::new());
        assert_eq!(result.status, SolverStatus::Sat);
    }

    #[test]
    fn already_cancelled_token_short_circuits() {
        let solver = SafeSolver::new(SolverLimits::default());
        let token = CancellationToken::new();
        token.cancel();
        let q = query("(check-sat)");
        let result = solver.check_sat(&q, Duration::from_secs(5), &token);
        assert!(result.cancelled);
    }
}
