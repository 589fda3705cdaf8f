//! Trace evaluator (spec §4.10, C13): three-valued (strong-Kleene) evaluation of a
//! clause expression against a recorded execution trace, plus the two special
//! trace-only predicates `never_logged`/`never_stored_plaintext`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::{BinaryOp, Expr, QuantifierKind, UnaryOp};

/// `{true, false, unknown}` with the standard strong-Kleene `and`/`or`/`not` (spec
/// §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    True,
    False,
    Unknown,
}

impl TriState {
    pub fn from_bool(b: bool) -> TriState {
        if b {
            TriState::True
        } else {
            TriState::False
        }
    }

    pub fn not(self) -> TriState {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }

    pub fn and(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Unknown,
        }
    }

    pub fn or(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub path: String,
    #[serde(default)]
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckEvent {
    pub category: String,
    pub expression: String,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub state_change: Option<StateChange>,
    #[serde(default)]
    pub check: Option<CheckEvent>,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub behavior: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckedAt {
    Pre,
    Post,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseStatus {
    Proven,
    Violated,
    NotProven,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSlice {
    pub trace_id: String,
    pub start: String,
    pub end: String,
    pub event_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtEvidence {
    pub query_hash: String,
    pub solver: String,
    #[serde(default)]
    pub solver_version: Option<String>,
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub smt_lib_query: Option<String>,
    pub timestamp: String,
}

/// The record a clause produces once evaluated (spec §4.10), later refined in place by
/// the SMT resolver stage (spec §4.11: "a pure merge keyed by clause id").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseEvidence {
    pub clause_id: String,
    pub status: ClauseStatus,
    pub tri_state_result: TriState,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub trace_slice: Option<TraceSlice>,
    pub checked_at: CheckedAt,
    #[serde(default)]
    pub smt_evidence: Option<SmtEvidence>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

impl ClauseEvidence {
    pub fn new(clause_id: impl Into<String>, tri_state: TriState, checked_at: CheckedAt) -> Self {
        let status = match tri_state {
            TriState::True => ClauseStatus::Proven,
            TriState::False => ClauseStatus::Violated,
            TriState::Unknown => ClauseStatus::NotProven,
        };
        ClauseEvidence {
            clause_id: clause_id.into(),
            status,
            tri_state_result: tri_state,
            reason: None,
            trace_slice: None,
            checked_at,
            smt_evidence: None,
            resolved_by: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_trace_slice(mut self, slice: TraceSlice) -> Self {
        self.trace_slice = Some(slice);
        self
    }

    /// Applies an SMT resolution. Monotonic: a clause already `proven`/`violated` is
    /// never downgraded back toward `not_proven` (spec §7, "SMT monotonicity").
    pub fn apply_smt_resolution(&mut self, tri_state: TriState, evidence: SmtEvidence) {
        if self.status != ClauseStatus::NotProven {
            return;
        }
        if let TriState::Unknown = tri_state {
            self.reason = evidence.reason.clone();
            self.smt_evidence = Some(evidence);
            return;
        }
        self.tri_state_result = tri_state;
        self.status = match tri_state {
            TriState::True => ClauseStatus::Proven,
            TriState::False => ClauseStatus::Violated,
            TriState::Unknown => unreachable!(),
        };
        self.smt_evidence = Some(evidence);
        self.resolved_by = Some("runtime_then_smt".to_string());
    }
}

/// Before/after state snapshots derived by replaying a trace's `stateChange` events in
/// order (spec §4.10).
pub struct TraceContext<'a> {
    pub trace: &'a Trace,
    pub before: BTreeMap<String, Value>,
    pub after: BTreeMap<String, Value>,
}

impl<'a> TraceContext<'a> {
    pub fn build(trace: &'a Trace) -> Self {
        let mut before = BTreeMap::new();
        let mut after = BTreeMap::new();
        replay(&trace.events, &mut before, &mut after, true);
        TraceContext {
            trace,
            before,
            after,
        }
    }

    pub fn event_count(&self) -> usize {
        count_events(&self.trace.events)
    }
}

fn count_events(events: &[Event]) -> usize {
    events
        .iter()
        .map(|e| 1 + count_events(&e.events))
        .sum()
}

fn replay(
    events: &[Event],
    before: &mut BTreeMap<String, Value>,
    after: &mut BTreeMap<String, Value>,
    is_first_pass: bool,
) {
    for event in events {
        if let Some(change) = &event.state_change {
            if is_first_pass && !before.contains_key(&change.path) {
                before.insert(change.path.clone(), change.old_value.clone());
            }
            after.insert(change.path.clone(), change.new_value.clone());
        }
        replay(&event.events, before, after, is_first_pass);
    }
}

/// Reconstructs the dotted state-map key an `Identifier`/`Member`/`QualifiedName`
/// chain refers to, e.g. `grant.used` for `Member(Identifier("grant"), "used")`.
fn path_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier { name, .. } => Some(name.clone()),
        Expr::QualifiedName { parts, .. } => Some(parts.join(".")),
        Expr::Member { object, property, .. } => {
            path_of(object).map(|base| format!("{base}.{property}"))
        }
        _ => None,
    }
}

/// The field-name argument `never_logged`/`never_stored_plaintext` take: usually a
/// bare identifier, but a string literal is accepted too.
fn field_name_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::StringLiteral { value, .. } => Some(value.clone()),
        other => path_of(other),
    }
}

static HASH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\$2[aby]\$\d{2}\$[./A-Za-z0-9]{53}$").unwrap(), // bcrypt
        Regex::new(r"^[a-f0-9]{64}$").unwrap(),                       // sha-256
        Regex::new(r"^[a-f0-9]{128}$").unwrap(),                      // sha-512
        Regex::new(r"^pbkdf2[-_:]").unwrap(),                         // pbkdf2
        Regex::new(r"^\$argon2(id|i|d)\$").unwrap(),                  // argon2
    ]
});

fn looks_hashed(value: &str) -> bool {
    HASH_PATTERNS.iter().any(|re| re.is_match(value))
}

/// `never_logged(field)`: true iff no `check` event anywhere in the trace mentions
/// `field` in its expression while marked `passed=false`... per spec: any check event
/// whose expression mentions the field and was *not* marked passed indicates a
/// logging violation, so the predicate is false in that case.
fn never_logged(field: &str, events: &[Event]) -> bool {
    !events.iter().any(|e| {
        let here = e
            .check
            .as_ref()
            .map(|c| c.expression.contains(field) && !c.passed)
            .unwrap_or(false);
        here || !never_logged(field, &e.events)
    })
}

/// `never_stored_plaintext(field)`: true iff every state-change event whose path
/// mentions `field` stores a value matching one of the closed hash-pattern regexes.
fn never_stored_plaintext(field: &str, events: &[Event]) -> bool {
    !events.iter().any(|e| {
        let here = e
            .state_change
            .as_ref()
            .map(|c| {
                c.path.contains(field)
                    && c.new_value
                        .as_str()
                        .map(|s| !looks_hashed(s))
                        .unwrap_or(true)
            })
            .unwrap_or(false);
        here || !never_stored_plaintext(field, &e.events)
    })
}

/// Resolves a value-producing expression in `ctx`. `None` means "unknown" — the value
/// could not be determined from the trace, not that it is literally absent.
fn eval_value(expr: &Expr, ctx: &TraceContext, old_mode: bool) -> Option<Value> {
    let state = if old_mode { &ctx.before } else { &ctx.after };
    match expr {
        Expr::StringLiteral { value, .. } => Some(Value::String(value.clone())),
        Expr::NumberLiteral { value, .. } => serde_json::Number::from_f64(*value).map(Value::Number),
        Expr::BooleanLiteral { value, .. } => Some(Value::Bool(*value)),
        Expr::NullLiteral { .. } => Some(Value::Null),
        Expr::DurationLiteral { value, .. } => {
            serde_json::Number::from_f64(*value).map(Value::Number)
        }
        Expr::Identifier { .. } | Expr::QualifiedName { .. } | Expr::Member { .. } => {
            path_of(expr).and_then(|p| state.get(&p).cloned())
        }
        Expr::Old { expr: inner, .. } => eval_value(inner, ctx, true),
        Expr::Result { property, .. } => {
            let key = match property {
                Some(p) => format!("result.{p}"),
                None => "result".to_string(),
            };
            ctx.after.get(&key).cloned()
        }
        Expr::Input { property, .. } => ctx.before.get(&format!("input.{property}")).cloned(),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
            ..
        } => {
            let n = eval_value(operand, ctx, old_mode)?.as_f64()?;
            serde_json::Number::from_f64(-n).map(Value::Number)
        }
        Expr::Binary {
            op: op @ (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod),
            left,
            right,
            ..
        } => {
            let l = eval_value(left, ctx, old_mode)?.as_f64()?;
            let r = eval_value(right, ctx, old_mode)?.as_f64()?;
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div if r != 0.0 => l / r,
                BinaryOp::Mod if r != 0.0 => l % r,
                _ => return None,
            };
            serde_json::Number::from_f64(result).map(Value::Number)
        }
        Expr::ListExpr { elements, .. } => {
            let mut values = Vec::with_capacity(elements.len());
            for e in elements {
                values.push(eval_value(e, ctx, old_mode)?);
            }
            Some(Value::Array(values))
        }
        Expr::Call { callee, args, .. } => match crate::ast::callee_name(callee) {
            Some("length") if args.len() == 1 => {
                let v = eval_value(&args[0], ctx, old_mode)?;
                match v {
                    Value::String(s) => Some(Value::from(s.chars().count())),
                    Value::Array(a) => Some(Value::from(a.len())),
                    _ => None,
                }
            }
            Some("abs") if args.len() == 1 => {
                let n = eval_value(&args[0], ctx, old_mode)?.as_f64()?;
                serde_json::Number::from_f64(n.abs()).map(Value::Number)
            }
            _ => None,
        },
        _ => None,
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> TriState {
    let result = match op {
        BinaryOp::Eq => Some(l == r),
        BinaryOp::Neq => Some(l != r),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => Some(match op {
                    BinaryOp::Lt => a < b,
                    BinaryOp::Lte => a <= b,
                    BinaryOp::Gt => a > b,
                    BinaryOp::Gte => a >= b,
                    _ => unreachable!(),
                }),
                _ => None,
            }
        }
        _ => None,
    };
    result.map(TriState::from_bool).unwrap_or(TriState::Unknown)
}

/// Evaluates `expr` against `ctx` using strong-Kleene three-valued logic (spec §4.10).
pub fn eval_bool(expr: &Expr, ctx: &TraceContext) -> TriState {
    eval_bool_inner(expr, ctx, false)
}

fn eval_bool_inner(expr: &Expr, ctx: &TraceContext, old_mode: bool) -> TriState {
    match expr {
        Expr::BooleanLiteral { value, .. } => TriState::from_bool(*value),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => eval_bool_inner(operand, ctx, old_mode).not(),
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
            ..
        } => eval_bool_inner(left, ctx, old_mode).and(eval_bool_inner(right, ctx, old_mode)),
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
            ..
        } => eval_bool_inner(left, ctx, old_mode).or(eval_bool_inner(right, ctx, old_mode)),
        Expr::Binary {
            op: BinaryOp::Implies,
            left,
            right,
            ..
        } => eval_bool_inner(left, ctx, old_mode)
            .not()
            .or(eval_bool_inner(right, ctx, old_mode)),
        Expr::Binary { op, left, right, .. } => {
            match (eval_value(left, ctx, old_mode), eval_value(right, ctx, old_mode)) {
                (Some(l), Some(r)) => compare(*op, &l, &r),
                _ => TriState::Unknown,
            }
        }
        Expr::Old { expr: inner, .. } => eval_bool_inner(inner, ctx, true),
        Expr::Conditional {
            cond,
            then_branch,
            else_branch,
            ..
        } => match eval_bool_inner(cond, ctx, old_mode) {
            TriState::True => eval_bool_inner(then_branch, ctx, old_mode),
            TriState::False => eval_bool_inner(else_branch, ctx, old_mode),
            TriState::Unknown => TriState::Unknown,
        },
        Expr::Quantifier {
            kind,
            var,
            collection,
            predicate,
            ..
        } => eval_quantifier(*kind, var, collection, predicate, ctx, old_mode),
        Expr::Call { callee, args, .. } => match crate::ast::callee_name(callee) {
            Some("never_logged") => args
                .first()
                .and_then(field_name_of)
                .map(|field| TriState::from_bool(never_logged(&field, &ctx.trace.events)))
                .unwrap_or(TriState::Unknown),
            Some("never_stored_plaintext") => args
                .first()
                .and_then(field_name_of)
                .map(|field| TriState::from_bool(never_stored_plaintext(&field, &ctx.trace.events)))
                .unwrap_or(TriState::Unknown),
            _ => TriState::Unknown,
        },
        _ => match eval_value(expr, ctx, old_mode) {
            Some(Value::Bool(b)) => TriState::from_bool(b),
            _ => TriState::Unknown,
        },
    }
}

fn eval_quantifier(
    kind: QuantifierKind,
    var: &str,
    collection: &Expr,
    predicate: &Expr,
    ctx: &TraceContext,
    old_mode: bool,
) -> TriState {
    let Some(Value::Array(items)) = eval_value(collection, ctx, old_mode) else {
        return TriState::Unknown;
    };
    if items.is_empty() {
        return match kind {
            QuantifierKind::ForAll => TriState::True,
            QuantifierKind::Exists => TriState::False,
        };
    }

    let mut extended_after = ctx.after.clone();
    let mut extended_before = ctx.before.clone();
    let mut any_unknown = false;
    let mut any_false = false;
    let mut any_true = false;

    for item in items {
        extended_after.insert(var.to_string(), item.clone());
        extended_before.insert(var.to_string(), item.clone());
        let sub_ctx = TraceContext {
            trace: ctx.trace,
            before: extended_before.clone(),
            after: extended_after.clone(),
        };
        match eval_bool_inner(predicate, &sub_ctx, old_mode) {
            TriState::True => any_true = true,
            TriState::False => any_false = true,
            TriState::Unknown => any_unknown = true,
        }
    }

    match kind {
        QuantifierKind::ForAll => {
            if any_false {
                TriState::False
            } else if any_unknown {
                TriState::Unknown
            } else {
                TriState::True
            }
        }
        QuantifierKind::Exists => {
            if any_true {
                TriState::True
            } else if any_unknown {
                TriState::Unknown
            } else {
                TriState::False
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn span() -> Span {
        Span::test(1, 1)
    }

    fn id(name: &str) -> Expr {
        Expr::Identifier {
            name: name.to_string(),
            span: span(),
        }
    }

    fn trace_with_change(path: &str, old: Value, new: Value) -> Trace {
        Trace {
            id: "t1".to_string(),
            behavior: "ExchangeCode".to_string(),
            start_time: "0".to_string(),
            end_time: "1".to_string(),
            events: vec![Event {
                state_change: Some(StateChange {
                    path: path.to_string(),
                    old_value: old,
                    new_value: new,
                }),
                check: None,
                events: vec![],
            }],
        }
    }

    #[test]
    fn boolean_field_resolves_from_state() {
        let trace = trace_with_change("grant.used", Value::Bool(false), Value::Bool(true));
        let ctx = TraceContext::build(&trace);
        let expr = Expr::Member {
            object: Box::new(id("grant")),
            property: "used".to_string(),
            span: span(),
        };
        assert_eq!(eval_bool(&expr, &ctx), TriState::True);
    }

    #[test]
    fn old_reads_pre_state() {
        let trace = trace_with_change("grant.used", Value::Bool(false), Value::Bool(true));
        let ctx = TraceContext::build(&trace);
        let expr = Expr::Old {
            expr: Box::new(Expr::Member {
                object: Box::new(id("grant")),
                property: "used".to_string(),
                span: span(),
            }),
            span: span(),
        };
        assert_eq!(eval_bool(&expr, &ctx), TriState::False);
    }

    #[test]
    fn missing_field_is_unknown() {
        let trace = trace_with_change("grant.used", Value::Bool(false), Value::Bool(true));
        let ctx = TraceContext::build(&trace);
        let expr = Expr::Member {
            object: Box::new(id("grant")),
            property: "revoked".to_string(),
            span: span(),
        };
        assert_eq!(eval_bool(&expr, &ctx), TriState::Unknown);
    }

    #[test]
    fn never_stored_plaintext_detects_bcrypt_hash() {
        let trace = trace_with_change(
            "user.password",
            Value::Null,
            Value::String("$2b$12$abcdefghijklmnopqrstuABCDEFGHIJKLMNOPQRSTUVWXYZ012345".to_string()),
        );
        let ctx = TraceContext::build(&trace);
        let expr = Expr::Call {
            callee: Box::new(id("never_stored_plaintext")),
            args: vec![Expr::StringLiteral {
                value: "password".to_string(),
                span: span(),
            }],
            span: span(),
        };
        assert_eq!(eval_bool(&expr, &ctx), TriState::True);
    }

    #[test]
    fn forall_over_empty_collection_is_true() {
        let trace = trace_with_change("grant.used", Value::Bool(false), Value::Bool(true));
        let ctx = TraceContext::build(&trace);
        let expr = Expr::Quantifier {
            kind: QuantifierKind::ForAll,
            var: "x".to_string(),
            collection: Box::new(Expr::ListExpr {
                elements: vec![],
                span: span(),
            }),
            predicate: Box::new(Expr::BooleanLiteral { value: true, span: span() }),
            span: span(),
        };
        assert_eq!(eval_bool(&expr, &ctx), TriState::True);
    }
}
