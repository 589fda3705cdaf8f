//! SMT resolver stage (spec §4.11, C14): routes clauses whose trace verdict is
//! `not_proven`/unknown through the encoder, safe solver, and diagnostics, under a
//! per-clause and a global wall-clock budget.
//!
//! Clauses are resolved strictly one at a time — never in parallel — so that global
//! budget depletion is deterministic across runs (spec §5, "Scheduling model").

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::ast::{flatten_conjuncts, Expr};
use crate::smt::diagnostics::{classify_unknown, extract_counterexample};
use crate::smt::encoder::{self, Declarations};
use crate::smt::solver::{CancellationToken, SafeSolver, SmtQuery, SolverStatus};
use crate::smt::TypingContext;
use crate::trace::{ClauseEvidence, SmtEvidence};

/// A clause still open after trace evaluation, ready to hand to the solver.
pub struct PendingClause<'a> {
    pub clause_id: String,
    pub expr: &'a Expr,
    pub ctx: &'a TypingContext,
}

/// Bounds carried from [`crate::config::TimeoutConfig`] into this stage.
#[derive(Debug, Clone, Copy)]
pub struct ResolverBudgets {
    pub timeout_per_clause: Duration,
    pub global_timeout: Duration,
}

/// An injectable source of the `timestamp` field on [`SmtEvidence`], so resolution
/// stays deterministic under test rather than depending on wall-clock time directly.
pub trait Clock {
    fn now(&self) -> String;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        format!("{}", since_epoch.as_millis())
    }
}

fn query_hash(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolves every pending clause against `evidence_by_id`, mutating each
/// [`ClauseEvidence`] in place via [`ClauseEvidence::apply_smt_resolution`] (spec §4.11:
/// "a pure merge keyed by clause id"). Clauses are processed in the order given;
/// callers are expected to pass them in the deterministic clause-id order the
/// orchestrator assigns (spec §5).
pub fn resolve_pending(
    pending: &[PendingClause],
    evidence_by_id: &mut std::collections::BTreeMap<String, ClauseEvidence>,
    budgets: ResolverBudgets,
    solver: &SafeSolver,
    clock: &dyn Clock,
) {
    let start = Instant::now();
    let cancellation = CancellationToken::new();

    for clause in pending {
        if start.elapsed() >= budgets.global_timeout {
            if let Some(evidence) = evidence_by_id.get_mut(&clause.clause_id) {
                let smt_evidence = SmtEvidence {
                    query_hash: String::new(),
                    solver: "z3".to_string(),
                    solver_version: None,
                    status: "unknown".to_string(),
                    model: None,
                    reason: Some("global budget exceeded".to_string()),
                    duration_ms: 0,
                    smt_lib_query: None,
                    timestamp: clock.now(),
                };
                evidence.apply_smt_resolution(crate::trace::TriState::Unknown, smt_evidence);
            }
            continue;
        }

        let Some(evidence) = evidence_by_id.get(&clause.clause_id) else {
            continue;
        };
        if evidence.status != crate::trace::ClauseStatus::NotProven {
            continue;
        }

        let resolution = resolve_one(clause, budgets.timeout_per_clause, solver, &cancellation, clock);
        if let Some(evidence) = evidence_by_id.get_mut(&clause.clause_id) {
            evidence.apply_smt_resolution(resolution.0, resolution.1);
        }
    }
}

fn resolve_one(
    clause: &PendingClause,
    timeout_per_clause: Duration,
    solver: &SafeSolver,
    cancellation: &CancellationToken,
    clock: &dyn Clock,
) -> (crate::trace::TriState, SmtEvidence) {
    let mut decls = Declarations::new();
    let conjuncts = flatten_conjuncts(clause.expr);
    let mut tagged = vec![];
    for (i, conjunct) in conjuncts.iter().enumerate() {
        match encoder::encode(conjunct, clause.ctx, &mut decls) {
            Ok(term) => tagged.push((format!("c{i}"), term)),
            Err(err) => {
                return unresolved(
                    clock,
                    format!("cannot encode clause for SMT: {}", err.message),
                )
            }
        }
    }

    let preamble = decls.render();
    let negated: Vec<String> = tagged
        .iter()
        .map(|(tag, term)| format!("(assert (! (not {term}) :named neg_{tag}))\n"))
        .collect();
    let script = format!(
        "{preamble}{}\n(check-sat)\n",
        negated.join("")
    );
    let hash = query_hash(&script);

    let query = SmtQuery {
        script: script.clone(),
        variable_count: decls.render().matches("declare-const").count(),
        assertion_count: tagged.len(),
        max_expr_depth: 64,
        node_count: tagged.len() * 8,
    };

    let grace = timeout_per_clause + Duration::from_millis(200);
    let result = solver.check_sat(&query, grace, cancellation);

    let (tri_state, status_str, model, reason) = match result.status {
        SolverStatus::Sat => {
            let counterexample = result.model.as_deref().map(|model_text| {
                extract_counterexample(model_text, &preamble, &tagged, solver, timeout_per_clause)
            });
            let explanation = counterexample.map(|c| c.explanation);
            (
                crate::trace::TriState::False,
                "disproved".to_string(),
                result.model.clone(),
                explanation,
            )
        }
        SolverStatus::Unsat => (
            crate::trace::TriState::True,
            "proved".to_string(),
            None,
            None,
        ),
        SolverStatus::Timeout => (
            crate::trace::TriState::Unknown,
            "still_unknown".to_string(),
            None,
            Some("timed out".to_string()),
        ),
        SolverStatus::Unknown | SolverStatus::Error => {
            let classification = classify_unknown(&result.status, result.reason.as_deref(), result.cancelled);
            (
                crate::trace::TriState::Unknown,
                "still_unknown".to_string(),
                None,
                Some(format!("{classification:?}: {}", result.reason.unwrap_or_default())),
            )
        }
    };

    let evidence = SmtEvidence {
        query_hash: hash,
        solver: "z3".to_string(),
        solver_version: None,
        status: status_str,
        model,
        reason,
        duration_ms: result.wall_time_ms,
        smt_lib_query: Some(script),
        timestamp: clock.now(),
    };
    (tri_state, evidence)
}

fn unresolved(clock: &dyn Clock, reason: String) -> (crate::trace::TriState, SmtEvidence) {
    let evidence = SmtEvidence {
        query_hash: String::new(),
        solver: "z3".to_string(),
        solver_version: None,
        status: "still_unknown".to_string(),
        model: None,
        reason: Some(reason),
        duration_ms: 0,
        smt_lib_query: None,
        timestamp: clock.now(),
    };
    (crate::trace::TriState::Unknown, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Span};
    use crate::config::SolverLimits;
    use crate::trace::{CheckedAt, ClauseEvidence};
    use std::collections::BTreeMap;

    struct FixedClock;
    impl Clock for FixedClock {
        fn now(&self) -> String {
            "0".to_string()
        }
    }

    fn span() -> Span {
        Span::test(1, 1)
    }

    fn id(name: &str) -> Expr {
        Expr::Identifier {
            name: name.to_string(),
            span: span(),
        }
    }

    #[test]
    fn provable_clause_resolves_to_proven() {
        let expr = Expr::Binary {
            op: BinaryOp::Gte,
            left: Box::new(Expr::Binary {
                op: BinaryOp::Mul,
                left: Box::new(id("x")),
                right: Box::new(id("x")),
                span: span(),
            }),
            right: Box::new(Expr::NumberLiteral {
                value: 0.0,
                is_float: false,
                span: span(),
            }),
            span: span(),
        };
        let ctx = TypingContext::new().with("x", crate::smt::SmtSort::Real);
        let pending = vec![PendingClause {
            clause_id: "clause-1".to_string(),
            expr: &expr,
            ctx: &ctx,
        }];

        let mut evidence = BTreeMap::new();
        evidence.insert(
            "clause-1".to_string(),
            ClauseEvidence::new("clause-1", crate::trace::TriState::Unknown, CheckedAt::Post),
        );

        let solver = SafeSolver::new(SolverLimits::default());
        resolve_pending(
            &pending,
            &mut evidence,
            ResolverBudgets {
                timeout_per_clause: Duration::from_secs(5),
                global_timeout: Duration::from_secs(60),
            },
            &solver,
            &FixedClock,
        );

        let result = &evidence["clause-1"];
        assert_eq!(result.status, crate::trace::ClauseStatus::Proven);
        assert_eq!(result.resolved_by.as_deref(), Some("runtime_then_smt"));
        assert!(result.smt_evidence.is_some());
    }

    #[test]
    fn exhausted_global_budget_marks_remaining_unknown() {
        let expr = Expr::BooleanLiteral { value: true, span: span() };
        let ctx = TypingContext::new();
        let pending = vec![PendingClause {
            clause_id: "clause-1".to_string(),
            expr: &expr,
            ctx: &ctx,
        }];
        let mut evidence = BTreeMap::new();
        evidence.insert(
            "clause-1".to_string(),
            ClauseEvidence::new("clause-1", crate::trace::TriState::Unknown, CheckedAt::Post),
        );
        let solver = SafeSolver::new(SolverLimits::default());
        resolve_pending(
            &pending,
            &mut evidence,
            ResolverBudgets {
                timeout_per_clause: Duration::from_secs(5),
                global_timeout: Duration::from_secs(0),
            },
            &solver,
            &FixedClock,
        );
        let result = &evidence["clause-1"];
        assert_eq!(result.reason.as_deref(), Some("global budget exceeded"));
        assert_eq!(result.status, crate::trace::ClauseStatus::NotProven);
    }
}
