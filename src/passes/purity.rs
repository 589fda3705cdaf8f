//! Purity/scope pass (spec §4.3, C6).
//!
//! Name-based (not type-directed) checks against closed call-name sets — intentional,
//! since the DSL is specification-level and has no notion of side-effecting types.

use crate::ast::{callee_name, walk_expr, BinaryOp, Expr, ScopeKind};
use crate::diagnostics::{Diagnostic, Severity};
use crate::passes::{Pass, PassContext, PassId};

const MUTATING_CALLS: &[&str] = &[
    "push", "pop", "shift", "splice", "set", "delete", "clear", "add", "remove", "update",
    "insert", "save", "persist", "write", "append", "modify", "mutate", "increment", "decrement",
];

const NONDETERMINISTIC_CALLS: &[&str] = &[
    "random",
    "uuid",
    "generateId",
    "randomInt",
    "randomFloat",
    "now",
    "currentTime",
    "timestamp",
    "today",
    "currentDate",
];

const EXTERNAL_CALLS: &[&str] = &[
    "fetch", "request", "call", "invoke", "send", "emit", "dispatch", "trigger", "notify",
    "publish", "broadcast", "log", "print", "trace", "debug",
];

pub struct PurityScopePass;

impl Pass for PurityScopePass {
    fn id(&self) -> PassId {
        "purity"
    }
    fn name(&self) -> &str {
        "Purity/scope pass"
    }
    fn description(&self) -> &str {
        "Enforces what may appear in precondition/postcondition/invariant/temporal/security clauses"
    }
    fn dependencies(&self) -> &[PassId] {
        &["resolver"]
    }

    fn run(&self, ctx: &mut PassContext) -> Vec<Diagnostic> {
        let resolver_ran = ctx.pass_ran("resolver");
        let mut diagnostics = vec![];
        for behavior in &ctx.ast.behaviors {
            check_clauses(&behavior.preconditions, ScopeKind::Precondition, resolver_ran, &mut diagnostics);
            for block in &behavior.postconditions {
                check_clauses(&block.predicates, ScopeKind::Postcondition, resolver_ran, &mut diagnostics);
            }
            check_clauses(&behavior.invariants, ScopeKind::Invariant, resolver_ran, &mut diagnostics);
            check_clauses(&behavior.temporal, ScopeKind::Temporal, resolver_ran, &mut diagnostics);
            check_clauses(&behavior.security, ScopeKind::Security, resolver_ran, &mut diagnostics);
            check_clauses(&behavior.compliance, ScopeKind::Compliance, resolver_ran, &mut diagnostics);
        }
        for entity in &ctx.ast.entities {
            check_clauses(&entity.invariants, ScopeKind::Invariant, resolver_ran, &mut diagnostics);
        }
        diagnostics
    }
}

fn check_clauses(
    exprs: &[Expr],
    kind: ScopeKind,
    resolver_ran: bool,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for expr in exprs {
        walk_expr(expr, &mut |node| check_node(node, kind, resolver_ran, diagnostics));
    }
}

fn check_node(node: &Expr, kind: ScopeKind, resolver_ran: bool, diagnostics: &mut Vec<Diagnostic>) {
    match node {
        Expr::Call { callee, span, .. } => {
            let Some(name) = callee_name(callee) else {
                return;
            };
            if MUTATING_CALLS.contains(&name) {
                if kind == ScopeKind::Invariant {
                    diagnostics.push(Diagnostic::new(
                        "E0401",
                        "purity",
                        Severity::Error,
                        format!("mutating call '{name}' is not allowed inside an invariant"),
                        span,
                    ));
                } else if matches!(
                    kind,
                    ScopeKind::Precondition | ScopeKind::Postcondition
                ) {
                    diagnostics.push(Diagnostic::new(
                        "E0400",
                        "purity",
                        Severity::Error,
                        format!("mutating call '{name}' is not allowed in a {kind_name} clause", kind_name = scope_name(kind)),
                        span,
                    ));
                }
            }
            if NONDETERMINISTIC_CALLS.contains(&name)
                && matches!(
                    kind,
                    ScopeKind::Precondition | ScopeKind::Postcondition | ScopeKind::Invariant
                )
            {
                diagnostics.push(Diagnostic::new(
                    "E0402",
                    "purity",
                    Severity::Warning,
                    format!("non-deterministic call '{name}' in a {} clause is not reproducible across runs", scope_name(kind)),
                    span,
                ));
            }
            if EXTERNAL_CALLS.contains(&name) {
                diagnostics.push(Diagnostic::new(
                    "E0413",
                    "purity",
                    Severity::Error,
                    format!("external-call-like name '{name}' is not allowed in a clause"),
                    span,
                ));
            }
        }
        Expr::Old { span, .. } if !resolver_ran && kind != ScopeKind::Postcondition => {
            diagnostics.push(Diagnostic::new(
                "E0411",
                "purity",
                Severity::Error,
                "old() may only appear in a postcondition predicate",
                span,
            ));
        }
        Expr::Result { span, .. } if !resolver_ran && kind != ScopeKind::Postcondition => {
            diagnostics.push(Diagnostic::new(
                "E0412",
                "purity",
                Severity::Error,
                "result is only available in a postcondition predicate",
                span,
            ));
        }
        Expr::Binary { op: BinaryOp::Assign, span, .. } => {
            diagnostics.push(Diagnostic::new(
                "E0414",
                "purity",
                Severity::Error,
                "assignment is not a pure constraint expression",
                span,
            ));
        }
        _ => {}
    }
}

fn scope_name(kind: ScopeKind) -> &'static str {
    match kind {
        ScopeKind::Precondition => "precondition",
        ScopeKind::Postcondition => "postcondition",
        ScopeKind::Invariant => "invariant",
        ScopeKind::Temporal => "temporal",
        ScopeKind::Security => "security",
        ScopeKind::Compliance => "compliance",
        ScopeKind::Scenario => "scenario",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Behavior, Domain, Field, Output, Span, TypeDef};
    use crate::passes::PassOutputs;
    use crate::symbols::SymbolTable;

    fn span() -> Span {
        Span::test(1, 1)
    }

    fn id(name: &str) -> Expr {
        Expr::Identifier {
            name: name.to_string(),
            span: span(),
        }
    }

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(id(name)),
            args,
            span: span(),
        }
    }

    fn behavior_with_precondition(expr: Expr) -> Behavior {
        Behavior {
            name: "Transfer".to_string(),
            description: None,
            actors: vec![],
            input: vec![Field {
                name: "amount".to_string(),
                type_: TypeDef::Primitive { name: "Int".to_string() },
                optional: false,
                annotations: vec![],
                span: span(),
            }],
            output: Output {
                success: TypeDef::Primitive { name: "Boolean".to_string() },
                errors: vec![],
            },
            preconditions: vec![expr],
            postconditions: vec![],
            invariants: vec![],
            temporal: vec![],
            security: vec![],
            compliance: vec![],
            span: span(),
        }
    }

    fn domain_with_behavior(behavior: Behavior) -> Domain {
        Domain {
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            imports: vec![],
            types: vec![],
            entities: vec![],
            behaviors: vec![behavior],
            invariants: vec![],
            policies: vec![],
            views: vec![],
            scenarios: vec![],
            chaos: vec![],
            span: span(),
        }
    }

    fn run_pass(domain: &Domain) -> Vec<Diagnostic> {
        let symbols = SymbolTable::build(domain);
        let mut outputs = PassOutputs::default();
        let mut ctx = PassContext {
            ast: domain,
            file: "test.dsl",
            symbols: &symbols,
            outputs: &mut outputs,
        };
        PurityScopePass.run(&mut ctx)
    }

    #[test]
    fn mutating_call_in_precondition_is_error() {
        let domain = domain_with_behavior(behavior_with_precondition(call("save", vec![id("amount")])));
        let diagnostics = run_pass(&domain);
        assert!(diagnostics.iter().any(|d| d.code == "E0400"));
    }

    #[test]
    fn nondeterministic_call_is_warning() {
        let domain = domain_with_behavior(behavior_with_precondition(call("now", vec![])));
        let diagnostics = run_pass(&domain);
        let diag = diagnostics.iter().find(|d| d.code == "E0402").unwrap();
        assert_eq!(diag.severity, Severity::Warning);
    }

    #[test]
    fn external_call_is_error() {
        let domain = domain_with_behavior(behavior_with_precondition(call("fetch", vec![])));
        let diagnostics = run_pass(&domain);
        assert!(diagnostics.iter().any(|d| d.code == "E0413"));
    }

    #[test]
    fn assignment_is_error() {
        let domain = domain_with_behavior(behavior_with_precondition(Expr::Binary {
            op: BinaryOp::Assign,
            left: Box::new(id("amount")),
            right: Box::new(id("zero")),
            span: span(),
        }));
        let diagnostics = run_pass(&domain);
        assert!(diagnostics.iter().any(|d| d.code == "E0414"));
    }
}
