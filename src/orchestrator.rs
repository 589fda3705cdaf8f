//! Orchestrator (spec §4.12, C15): wires the pass framework, the trace evaluator, and
//! the SMT resolver stage into one verification run and report.
//!
//! The orchestrator is the only component that imposes a wall-clock budget on an
//! entire run (spec §5): individual passes have no timeout of their own, and the SMT
//! resolver stage's per-clause/global timeouts are themselves configuration the
//! orchestrator hands down, not something it additionally wraps.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ast::{Behavior, Domain, Expr, PostConditionTarget, TypeDef};
use crate::config::VerifierConfig;
use crate::diagnostics::Diagnostic;
use crate::passes::PassRunner;
use crate::smt::resolver_stage::{self, PendingClause, ResolverBudgets, SystemClock};
use crate::smt::solver::SafeSolver;
use crate::smt::{SmtSort, TypingContext};
use crate::trace::{CheckedAt, ClauseEvidence, ClauseStatus, Trace, TraceContext};

/// What a single run is asked to verify: a domain, the file name diagnostics should be
/// attributed to, and zero or more recorded execution traces (spec §4.10: trace
/// evaluation only runs "if traces provided").
pub struct RunInput<'a> {
    pub domain: &'a Domain,
    pub file: &'a str,
    pub traces: &'a [Trace],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Totals {
    pub proven: usize,
    pub violated: usize,
    pub not_proven: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub totals: Totals,
    /// `proven + violated` over all clauses evaluated, or `1.0` when no traces were
    /// given (there is nothing to resolve).
    pub resolution_rate: f64,
    pub duration_ms: u64,
    pub budget_exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct PassesReport {
    pub diagnostics: Vec<Diagnostic>,
}

/// The merged output of a run (spec §4.12): `{ passes, clauses, summary }`.
pub struct RunReport {
    pub passes: PassesReport,
    pub clauses: Vec<ClauseEvidence>,
    pub summary: Summary,
}

/// Ties C4 (passes) -> C13 (trace evaluator) -> C14 (SMT resolver) together (spec
/// §4.12).
pub struct Orchestrator {
    config: VerifierConfig,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Orchestrator {
            config: VerifierConfig::default(),
        }
    }
}

impl Orchestrator {
    pub fn new(config: VerifierConfig) -> Self {
        Orchestrator { config }
    }

    pub fn run(&self, input: RunInput) -> RunReport {
        let start = Instant::now();

        tracing::debug!(file = %input.file, "static analysis started");
        let diagnostics = PassRunner::with_default_passes()
            .run(input.domain, input.file)
            .unwrap_or_else(|err| {
                vec![Diagnostic::new(
                    "I0002",
                    "internal",
                    crate::diagnostics::Severity::Error,
                    format!("pass framework setup failed: {err}"),
                    &input.domain.span,
                )]
            });
        tracing::debug!("static analysis done");

        if input.traces.is_empty() {
            let duration_ms = start.elapsed().as_millis() as u64;
            return RunReport {
                passes: PassesReport { diagnostics },
                clauses: vec![],
                summary: Summary {
                    totals: Totals {
                        proven: 0,
                        violated: 0,
                        not_proven: 0,
                    },
                    resolution_rate: 1.0,
                    duration_ms,
                    budget_exhausted: false,
                },
            };
        }

        tracing::debug!("trace evaluation started");
        let discovered = discover_clauses(input.domain, input.traces);
        let mut evidence: BTreeMap<String, ClauseEvidence> = BTreeMap::new();
        let mut typing_contexts: BTreeMap<String, TypingContext> = BTreeMap::new();
        let mut exprs: BTreeMap<String, &Expr> = BTreeMap::new();

        for clause in &discovered {
            let trace_ctx = TraceContext::build(clause.trace);
            let tri_state = crate::trace::eval_bool(clause.expr, &trace_ctx);
            let clause_evidence = ClauseEvidence::new(clause.id.clone(), tri_state, clause.checked_at)
                .with_trace_slice(crate::trace::TraceSlice {
                    trace_id: clause.trace.id.clone(),
                    start: clause.trace.start_time.clone(),
                    end: clause.trace.end_time.clone(),
                    event_count: trace_ctx.event_count(),
                });
            evidence.insert(clause.id.clone(), clause_evidence);
            typing_contexts.insert(clause.id.clone(), behavior_typing_context(clause.behavior));
            exprs.insert(clause.id.clone(), clause.expr);
        }
        tracing::debug!("trace evaluation finished, SMT resolution started");

        let pending: Vec<PendingClause> = discovered
            .iter()
            .filter(|c| {
                evidence
                    .get(&c.id)
                    .map(|e| e.status == ClauseStatus::NotProven)
                    .unwrap_or(false)
            })
            .map(|c| PendingClause {
                clause_id: c.id.clone(),
                expr: exprs[&c.id],
                ctx: &typing_contexts[&c.id],
            })
            .collect();

        let budgets = ResolverBudgets {
            timeout_per_clause: std::time::Duration::from_millis(self.config.timeouts.timeout_per_clause_ms),
            global_timeout: std::time::Duration::from_millis(self.config.timeouts.global_timeout_ms),
        };
        let solver = SafeSolver::new(self.config.solver.clone());
        resolver_stage::resolve_pending(&pending, &mut evidence, budgets, &solver, &SystemClock);
        tracing::debug!("SMT resolution finished");

        let duration_ms = start.elapsed().as_millis() as u64;
        let budget_exhausted = duration_ms >= self.config.timeouts.global_timeout_ms
            && evidence.values().any(|e| e.status == ClauseStatus::NotProven);
        if budget_exhausted {
            tracing::warn!(duration_ms, "global SMT budget exhausted");
        }

        let clauses: Vec<ClauseEvidence> = discovered
            .iter()
            .filter_map(|c| evidence.get(&c.id).cloned())
            .collect();
        let proven = clauses.iter().filter(|c| c.status == ClauseStatus::Proven).count();
        let violated = clauses.iter().filter(|c| c.status == ClauseStatus::Violated).count();
        let not_proven = clauses.iter().filter(|c| c.status == ClauseStatus::NotProven).count();
        let resolution_rate = if clauses.is_empty() {
            1.0
        } else {
            (proven + violated) as f64 / clauses.len() as f64
        };

        RunReport {
            passes: PassesReport { diagnostics },
            clauses,
            summary: Summary {
                totals: Totals {
                    proven,
                    violated,
                    not_proven,
                },
                resolution_rate,
                duration_ms,
                budget_exhausted,
            },
        }
    }
}

/// One clause discovered during evaluation, still borrowing from the domain/traces
/// that produced it.
struct DiscoveredClause<'a> {
    id: String,
    expr: &'a Expr,
    behavior: &'a Behavior,
    trace: &'a Trace,
    checked_at: CheckedAt,
}

/// Finds every clause of every behavior that has a matching trace (by `trace.behavior
/// == behavior.name`), depth-first over behaviors in declaration order (spec §5,
/// "Ordering guarantees": "clauses are discovered... depth-first over behaviors, then
/// invariants"). Domain-level (free-standing) invariants have no behavior to bind a
/// trace to and so are outside trace evaluation's scope (spec §4.10 is behavior/entity
/// clause evaluation); they're covered by the purity/exhaustiveness/consistency
/// passes instead.
fn discover_clauses<'a>(domain: &'a Domain, traces: &'a [Trace]) -> Vec<DiscoveredClause<'a>> {
    let mut out = vec![];
    for behavior in &domain.behaviors {
        for trace in traces.iter().filter(|t| t.behavior == behavior.name) {
            for (i, expr) in behavior.preconditions.iter().enumerate() {
                out.push(DiscoveredClause {
                    id: format!("{}::{}::precondition::{i}", trace.id, behavior.name),
                    expr,
                    behavior,
                    trace,
                    checked_at: CheckedAt::Pre,
                });
            }
            for block in &behavior.postconditions {
                let target = postcondition_target_name(&block.condition);
                for (i, expr) in block.predicates.iter().enumerate() {
                    out.push(DiscoveredClause {
                        id: format!("{}::{}::postcondition::{target}::{i}", trace.id, behavior.name),
                        expr,
                        behavior,
                        trace,
                        checked_at: CheckedAt::Post,
                    });
                }
            }
            for (section, exprs) in [
                ("invariant", &behavior.invariants),
                ("temporal", &behavior.temporal),
                ("security", &behavior.security),
                ("compliance", &behavior.compliance),
            ] {
                for (i, expr) in exprs.iter().enumerate() {
                    out.push(DiscoveredClause {
                        id: format!("{}::{}::{section}::{i}", trace.id, behavior.name),
                        expr,
                        behavior,
                        trace,
                        checked_at: CheckedAt::Continuous,
                    });
                }
            }
        }
    }
    out
}

fn postcondition_target_name(target: &PostConditionTarget) -> String {
    match target {
        PostConditionTarget::Success => "success".to_string(),
        PostConditionTarget::AnyError => "any_error".to_string(),
        PostConditionTarget::Named(name) => name.clone(),
    }
}

/// A typing context covering a behavior's declared input fields, sufficient for the
/// encoder to declare each as a typed constant rather than falling back to the
/// `Universe` catch-all sort (spec §4.6's type mapping).
fn behavior_typing_context(behavior: &Behavior) -> TypingContext {
    let mut ctx = TypingContext::new();
    for field in &behavior.input {
        ctx.insert(field.name.clone(), type_sort(&field.type_));
    }
    ctx
}

/// Maps a declared type to the SMT sort the encoder should use for it (spec §4.6:
/// `Int -> integer sort`, `Decimal -> real`, `Boolean -> boolean`, `String -> string`,
/// `UUID`/`Timestamp`/enum -> uninterpreted, `List<T>`/`Optional<T>` -> an
/// uninterpreted sort too, since neither the encoder nor the clauses this crate has
/// seen need their structure exposed to the solver rather than treated opaquely).
fn type_sort(type_def: &TypeDef) -> SmtSort {
    match type_def {
        TypeDef::Primitive { name } => match name.as_str() {
            "Int" => SmtSort::Int,
            "Decimal" => SmtSort::Real,
            "Boolean" => SmtSort::Bool,
            "String" => SmtSort::Str,
            other => SmtSort::Uninterpreted(other.to_string()),
        },
        TypeDef::Reference { qualified_name } => SmtSort::Uninterpreted(qualified_name.clone()),
        TypeDef::List { .. } => SmtSort::Uninterpreted("List".to_string()),
        TypeDef::Map { .. } => SmtSort::Uninterpreted("Map".to_string()),
        TypeDef::Optional { inner } => type_sort(inner),
        TypeDef::Constrained { base, .. } => type_sort(base),
        TypeDef::Struct { .. } | TypeDef::Union { .. } | TypeDef::Enum { .. } => {
            SmtSort::Uninterpreted("Universe".to_string())
        }
    }
}
