//! SMT diagnostics engine (spec §4.8, C11): counterexample extraction, keyword-based
//! unknown-result classification, and unsat-core minimization/localization.

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::diagnostics::Location;
use crate::smt::solver::{CancellationToken, SafeSolver, SmtQuery, SolverStatus};

static MODEL_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(define-fun\s+(\S+)\s*\(\)\s*\S+\s+([^()]+?)\s*\)").expect("static regex")
});

/// A counterexample extracted from a `sat` result: the raw model text plus which of
/// the tagged top-level conjuncts it falsifies (spec §4.8).
#[derive(Debug, Clone)]
pub struct Counterexample {
    pub model_text: String,
    pub violated_tags: Vec<String>,
    pub explanation: String,
}

/// Parses Z3's `(model (define-fun name () Sort value) ...)` text into a
/// `name -> value` map. Best-effort: unparseable lines are skipped rather than
/// treated as an error, since the model text is only used to pin values for
/// re-checking, never as the source of truth for satisfiability itself.
pub fn parse_model_assignments(model_text: &str) -> BTreeMap<String, String> {
    MODEL_ASSIGNMENT
        .captures_iter(model_text)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect()
}

/// For a `sat` result, determines which of the behavior's tagged top-level conjuncts
/// the model falsifies, by pinning the model's constant assignments and re-checking
/// each conjunct's negation in isolation (spec §4.8: "walk the top-level conjuncts,
/// evaluate each under the model, tag the ones that are false").
pub fn extract_counterexample(
    model_text: &str,
    declarations_preamble: &str,
    tagged_conjuncts: &[(String, String)],
    solver: &SafeSolver,
    per_check_timeout: Duration,
) -> Counterexample {
    let assignments = parse_model_assignments(model_text);
    let pins: String = assignments
        .iter()
        .map(|(name, value)| format!("(assert (= {name} {value}))\n"))
        .collect();

    let mut violated = vec![];
    let token = CancellationToken::new();
    for (tag, term) in tagged_conjuncts {
        let script = format!("{declarations_preamble}{pins}(assert (not {term}))\n(check-sat)\n");
        let query = SmtQuery {
            script,
            variable_count: assignments.len(),
            assertion_count: assignments.len() + 1,
            max_expr_depth: 1,
            node_count: assignments.len() + 1,
        };
        let result = solver.check_sat(&query, per_check_timeout, &token);
        if result.status == SolverStatus::Sat {
            violated.push(tag.clone());
        }
    }

    let explanation = if violated.is_empty() {
        "model satisfies every tagged clause; no violation localized".to_string()
    } else {
        format!(
            "the model violates: {}",
            violated.join(", ")
        )
    };

    Counterexample {
        model_text: model_text.to_string(),
        violated_tags: violated,
        explanation,
    }
}

/// The closed taxonomy an `unknown`/`error` solver outcome is classified into (spec
/// §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    Timeout,
    ResourceLimit,
    TooComplex,
    IncompleteTheory,
    SolverError,
    Cancelled,
    Unclassified,
}

/// Classifies a solver outcome's reason string against small closed keyword lists
/// (spec §4.8). Checked in a fixed priority order so overlapping keywords resolve
/// deterministically.
pub fn classify_unknown(status: &SolverStatus, reason: Option<&str>, cancelled: bool) -> UnknownReason {
    if cancelled {
        return UnknownReason::Cancelled;
    }
    if *status == SolverStatus::Timeout {
        return UnknownReason::Timeout;
    }
    let lower = reason.unwrap_or_default().to_ascii_lowercase();
    if lower.contains("timeout") {
        UnknownReason::Timeout
    } else if lower.contains("memory") || lower.contains("resource") {
        UnknownReason::ResourceLimit
    } else if lower.contains("complex") {
        UnknownReason::TooComplex
    } else if lower.contains("theory") || lower.contains("incomplete") {
        UnknownReason::IncompleteTheory
    } else if *status == SolverStatus::Error {
        UnknownReason::SolverError
    } else {
        UnknownReason::Unclassified
    }
}

/// Where a source map resolves a solver-assertion tag back to (spec §4.8's
/// `sourceMap?` parameter and §6's "Source map" glossary entry).
#[derive(Debug, Clone)]
pub struct SourceMapEntry {
    pub source_text: String,
    pub location: Location,
}

pub type SourceMap = BTreeMap<String, SourceMapEntry>;

#[derive(Debug, Clone)]
pub struct UnsatAnalysis {
    pub core_tags: Vec<String>,
    pub is_minimal: bool,
    pub core_locations: Vec<(String, Option<SourceMapEntry>)>,
}

/// Isolates a minimal unsat core. If `core_tags_hint` is supplied (e.g. Z3 already
/// returned one via `get-unsat-core`), it's trusted outright; otherwise a
/// deletion-based minimization re-solves with one fewer assertion at a time until no
/// further assertion can be dropped without losing unsatisfiability (spec §4.8).
pub fn analyze_unsat(
    declarations_preamble: &str,
    tagged_assertions: &[(String, String)],
    source_map: Option<&SourceMap>,
    core_tags_hint: Option<&[String]>,
    solver: &SafeSolver,
    per_check_timeout: Duration,
) -> UnsatAnalysis {
    let core_tags: Vec<String> = match core_tags_hint {
        Some(hint) => hint.to_vec(),
        None => minimize_core(declarations_preamble, tagged_assertions, solver, per_check_timeout),
    };
    let is_minimal = core_tags.len() <= 1;
    let core_locations = core_tags
        .iter()
        .map(|tag| {
            let entry = source_map.and_then(|m| m.get(tag)).cloned();
            (tag.clone(), entry)
        })
        .collect();
    UnsatAnalysis {
        core_tags,
        is_minimal,
        core_locations,
    }
}

fn minimize_core(
    declarations_preamble: &str,
    tagged_assertions: &[(String, String)],
    solver: &SafeSolver,
    per_check_timeout: Duration,
) -> Vec<String> {
    let token = CancellationToken::new();
    let mut remaining: Vec<(String, String)> = tagged_assertions.to_vec();

    let still_unsat = |keep: &[(String, String)]| -> bool {
        let assertions: String = keep
            .iter()
            .map(|(tag, term)| format!("(assert (! {term} :named {tag}))\n"))
            .collect();
        let script = format!("{declarations_preamble}{assertions}(check-sat)\n");
        let query = SmtQuery {
            script,
            variable_count: keep.len(),
            assertion_count: keep.len(),
            max_expr_depth: 1,
            node_count: keep.len(),
        };
        solver.check_sat(&query, per_check_timeout, &token).status == SolverStatus::Unsat
    };

    let mut i = 0;
    while i < remaining.len() {
        let mut candidate = remaining.clone();
        candidate.remove(i);
        if !candidate.is_empty() && still_unsat(&candidate) {
            remaining = candidate;
        } else {
            i += 1;
        }
    }
    remaining.into_iter().map(|(tag, _)| tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverLimits;

    #[test]
    fn parses_model_assignments() {
        let model = "(model\n  (define-fun x () Int\n    5)\n  (define-fun y () Bool\n    false)\n)";
        let assignments = parse_model_assignments(model);
        assert_eq!(assignments.get("x").unwrap(), "5");
        assert_eq!(assignments.get("y").unwrap(), "false");
    }

    #[test]
    fn classifies_known_keywords() {
        assert_eq!(
            classify_unknown(&SolverStatus::Unknown, Some("out of memory"), false),
            UnknownReason::ResourceLimit
        );
        assert_eq!(
            classify_unknown(&SolverStatus::Unknown, Some("formula too complex"), false),
            UnknownReason::TooComplex
        );
        assert_eq!(
            classify_unknown(&SolverStatus::Unknown, None, true),
            UnknownReason::Cancelled
        );
        assert_eq!(
            classify_unknown(&SolverStatus::Timeout, None, false),
            UnknownReason::Timeout
        );
    }

    #[test]
    fn minimizes_core_to_conflicting_pair() {
        let solver = SafeSolver::new(SolverLimits::default());
        let preamble = "(set-option :produce-unsat-cores true)\n(declare-const amount Int)\n";
        let assertions = vec![
            ("lower".to_string(), "(> amount 100)".to_string()),
            ("upper".to_string(), "(< amount 50)".to_string()),
            ("unrelated".to_string(), "(>= amount (- 1000000))".to_string()),
        ];
        let analysis = analyze_unsat(
            preamble,
            &assertions,
            None,
            None,
            &solver,
            Duration::from_secs(5),
        );
        assert_eq!(analysis.core_tags.len(), 2);
        assert!(analysis.core_tags.contains(&"lower".to_string()));
        assert!(analysis.core_tags.contains(&"upper".to_string()));
    }
}
