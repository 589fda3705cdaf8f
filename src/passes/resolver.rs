//! Symbol resolver pass (spec §4.2, C5).
//!
//! Validates every reference reachable from a behavior's clauses, an entity's
//! invariants, or a domain-level declaration, reporting an `E02xx`/`E03xx` diagnostic
//! family per miss, with a "did you mean" suggestion computed against the symbol class
//! the reference context expects.

use std::collections::BTreeSet;

use crate::ast::{Behavior, Domain, EntityDecl, Expr, PostConditionTarget, ScopeKind};
use crate::diagnostics::{Diagnostic, Severity};
use crate::passes::{Pass, PassContext, PassId};
use crate::symbols::{edit_distance, is_case_flipped_builtin, suggest, SymbolKind, SymbolTable};

pub struct SymbolResolverPass;

impl Pass for SymbolResolverPass {
    fn id(&self) -> PassId {
        "resolver"
    }
    fn name(&self) -> &str {
        "Symbol resolver"
    }
    fn description(&self) -> &str {
        "Validates every type/entity/behavior/field/variable reference and enforces old()/result() scope rules"
    }

    fn run(&self, ctx: &mut PassContext) -> Vec<Diagnostic> {
        let mut resolver = Resolver {
            symbols: ctx.symbols,
            diagnostics: vec![],
        };
        resolver.resolve_domain(ctx.ast);
        resolver.diagnostics
    }
}

struct Resolver<'a> {
    symbols: &'a SymbolTable,
    diagnostics: Vec<Diagnostic>,
}

/// What's in scope while walking one clause expression.
struct ClauseScope<'a> {
    kind: ScopeKind,
    bound_vars: Vec<BTreeSet<String>>,
    input_names: &'a [String],
    entity_fields: &'a [String],
}

impl<'a> ClauseScope<'a> {
    fn is_bound(&self, name: &str) -> bool {
        self.bound_vars.iter().any(|scope| scope.contains(name))
    }
}

impl<'a> Resolver<'a> {
    fn resolve_domain(&mut self, domain: &Domain) {
        for behavior in &domain.behaviors {
            self.resolve_behavior(behavior);
        }
        for entity in &domain.entities {
            self.resolve_entity(entity);
        }
        for inv in &domain.invariants {
            let owner_fields: &[String] = inv
                .owner
                .as_deref()
                .and_then(|o| self.symbols.entity_fields(o))
                .unwrap_or(&[]);
            let mut scope = ClauseScope {
                kind: ScopeKind::Invariant,
                bound_vars: vec![BTreeSet::new()],
                input_names: &[],
                entity_fields: owner_fields,
            };
            self.resolve_expr(&inv.expr, &mut scope);
        }
        for policy in &domain.policies {
            for rule in &policy.rules {
                let mut scope = ClauseScope {
                    kind: ScopeKind::Compliance,
                    bound_vars: vec![BTreeSet::new()],
                    input_names: &[],
                    entity_fields: &[],
                };
                self.resolve_expr(rule, &mut scope);
            }
        }
        for scenario in &domain.scenarios {
            let given: BTreeSet<String> = scenario.given.iter().map(|f| f.name.clone()).collect();
            for step in &scenario.steps {
                let mut scope = ClauseScope {
                    kind: ScopeKind::Scenario,
                    bound_vars: vec![given.clone()],
                    input_names: &[],
                    entity_fields: &[],
                };
                self.resolve_expr(step, &mut scope);
            }
        }
        for chaos in &domain.chaos {
            for cond in &chaos.conditions {
                let mut scope = ClauseScope {
                    kind: ScopeKind::Security,
                    bound_vars: vec![BTreeSet::new()],
                    input_names: &[],
                    entity_fields: &[],
                };
                self.resolve_expr(cond, &mut scope);
            }
        }
    }

    fn resolve_entity(&mut self, entity: &EntityDecl) {
        let fields: Vec<String> = entity.fields.iter().map(|f| f.name.clone()).collect();
        for inv in &entity.invariants {
            let mut scope = ClauseScope {
                kind: ScopeKind::Invariant,
                bound_vars: vec![BTreeSet::new()],
                input_names: &[],
                entity_fields: &fields,
            };
            self.resolve_expr(inv, &mut scope);
        }
    }

    fn resolve_behavior(&mut self, behavior: &Behavior) {
        let input_names: Vec<String> = behavior.input.iter().map(|f| f.name.clone()).collect();

        for pre in &behavior.preconditions {
            let mut scope = ClauseScope {
                kind: ScopeKind::Precondition,
                bound_vars: vec![BTreeSet::new()],
                input_names: &input_names,
                entity_fields: &[],
            };
            self.resolve_expr(pre, &mut scope);
        }

        for block in &behavior.postconditions {
            if let PostConditionTarget::Named(name) = &block.condition {
                if !behavior.output.errors.iter().any(|e| &e.name == name) {
                    self.diagnostics.push(
                        Diagnostic::new(
                            "E0705",
                            "exhaustiveness",
                            Severity::Error,
                            format!(
                                "postcondition branch '{name}' does not match any declared error of behavior '{}'",
                                behavior.name
                            ),
                            &block.span,
                        ),
                    );
                }
            }
            for pred in &block.predicates {
                let mut scope = ClauseScope {
                    kind: ScopeKind::Postcondition,
                    bound_vars: vec![BTreeSet::new()],
                    input_names: &input_names,
                    entity_fields: &[],
                };
                self.resolve_expr(pred, &mut scope);
            }
        }

        for inv in &behavior.invariants {
            let mut scope = ClauseScope {
                kind: ScopeKind::Invariant,
                bound_vars: vec![BTreeSet::new()],
                input_names: &input_names,
                entity_fields: &[],
            };
            self.resolve_expr(inv, &mut scope);
        }
        for t in &behavior.temporal {
            let mut scope = ClauseScope {
                kind: ScopeKind::Temporal,
                bound_vars: vec![BTreeSet::new()],
                input_names: &input_names,
                entity_fields: &[],
            };
            self.resolve_expr(t, &mut scope);
        }
        for s in &behavior.security {
            let mut scope = ClauseScope {
                kind: ScopeKind::Security,
                bound_vars: vec![BTreeSet::new()],
                input_names: &input_names,
                entity_fields: &[],
            };
            self.resolve_expr(s, &mut scope);
        }
        for c in &behavior.compliance {
            let mut scope = ClauseScope {
                kind: ScopeKind::Compliance,
                bound_vars: vec![BTreeSet::new()],
                input_names: &input_names,
                entity_fields: &[],
            };
            self.resolve_expr(c, &mut scope);
        }
    }

    /// Resolves one clause expression tree, pushing/popping bound-variable scopes as it
    /// descends into quantifiers and lambdas (spec §4.2).
    fn resolve_expr(&mut self, expr: &Expr, scope: &mut ClauseScope) {
        match expr {
            Expr::Identifier { name, span } => {
                if !self.identifier_resolves(name, scope) {
                    let mut diag = Diagnostic::new(
                        "E0300",
                        "resolver",
                        Severity::Error,
                        format!("undefined variable '{name}'"),
                        span,
                    );
                    let mut candidates: Vec<&str> = scope
                        .bound_vars
                        .iter()
                        .flatten()
                        .map(|s| s.as_str())
                        .chain(scope.input_names.iter().map(|s| s.as_str()))
                        .chain(scope.entity_fields.iter().map(|s| s.as_str()))
                        .collect();
                    candidates.extend(self.symbols.names_of_kind(SymbolKind::Entity));
                    candidates.extend(self.symbols.names_of_kind(SymbolKind::Behavior));
                    if let Some(s) = suggest(name, candidates) {
                        diag = diag.with_help(format!("did you mean '{s}'?"));
                    }
                    self.diagnostics.push(diag);
                }
            }
            Expr::QualifiedName { parts, span } => {
                if let Some(root) = parts.first() {
                    if self.symbols.kind_of(root).is_none()
                        && !self.symbols.is_builtin_primitive(root)
                    {
                        let mut diag = Diagnostic::new(
                            "E0201",
                            "resolver",
                            Severity::Error,
                            format!("undefined type '{root}'"),
                            span,
                        );
                        if let Some(builtin) = is_case_flipped_builtin(root) {
                            diag = diag.with_help(format!(
                                "builtin types are capitalized; did you mean '{builtin}'?"
                            ));
                        } else if let Some(s) = suggest(root, self.symbols.all_type_names()) {
                            diag = diag.with_help(format!("did you mean '{s}'?"));
                        }
                        self.diagnostics.push(diag);
                    }
                }
            }
            Expr::Old { expr: inner, span } => {
                if scope.kind != ScopeKind::Postcondition {
                    self.diagnostics.push(Diagnostic::new(
                        "E0304",
                        "resolver",
                        Severity::Error,
                        "old() may only appear in a postcondition predicate",
                        span,
                    ));
                }
                self.resolve_expr(inner, scope);
            }
            Expr::Result { span, .. } => match scope.kind {
                ScopeKind::Precondition => {
                    self.diagnostics.push(Diagnostic::new(
                        "E0311",
                        "resolver",
                        Severity::Error,
                        "result is not available in a precondition",
                        span,
                    ));
                }
                ScopeKind::Invariant => {
                    self.diagnostics.push(Diagnostic::new(
                        "W0311",
                        "resolver",
                        Severity::Warning,
                        "result used in an invariant; invariants should hold independent of any single behavior's output",
                        span,
                    ));
                }
                ScopeKind::Postcondition => {}
                _ => {}
            },
            Expr::Member { object, .. } => {
                self.resolve_expr(object, scope);
            }
            Expr::Quantifier {
                var,
                collection,
                predicate,
                ..
            } => {
                self.resolve_expr(collection, scope);
                scope.bound_vars.push([var.clone()].into_iter().collect());
                self.resolve_expr(predicate, scope);
                scope.bound_vars.pop();
            }
            Expr::Lambda { params, body, .. } => {
                scope.bound_vars.push(params.iter().cloned().collect());
                self.resolve_expr(body, scope);
                scope.bound_vars.pop();
            }
            _ => {
                for child in expr.children() {
                    self.resolve_expr(child, scope);
                }
            }
        }
    }

    fn identifier_resolves(&self, name: &str, scope: &ClauseScope) -> bool {
        scope.is_bound(name)
            || scope.input_names.iter().any(|n| n == name)
            || scope.entity_fields.iter().any(|n| n == name)
            || self.symbols.kind_of(name).is_some()
            || self.symbols.is_builtin_primitive(name)
            || self.symbols.is_builtin_function(name)
    }
}

#[allow(dead_code)]
fn unused_edit_distance_reference() -> usize {
    edit_distance("a", "b")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Domain, Field, Output, PostconditionBlock, Span, TypeDef};

    fn span() -> Span {
        Span::test(1, 1)
    }

    fn id(name: &str) -> Expr {
        Expr::Identifier {
            name: name.to_string(),
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
                type_: TypeDef::Primitive {
                    name: "Int".to_string(),
                },
                optional: false,
                annotations: vec![],
                span: span(),
            }],
            output: Output {
                success: TypeDef::Primitive {
                    name: "Boolean".to_string(),
                },
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

    #[test]
    fn undefined_variable_reported_with_suggestion() {
        let behavior = behavior_with_precondition(Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(id("amuont")),
            right: Box::new(Expr::NumberLiteral {
                value: 0.0,
                is_float: false,
                span: span(),
            }),
            span: span(),
        });
        let domain = domain_with_behavior(behavior);
        let symbols = SymbolTable::build(&domain);
        let mut outputs = crate::passes::PassOutputs::default();
        let mut ctx = PassContext {
            ast: &domain,
            file: "test.dsl",
            symbols: &symbols,
            outputs: &mut outputs,
        };
        let diagnostics = SymbolResolverPass.run(&mut ctx);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "E0300");
        assert!(diagnostics[0].help[0].contains("amount"));
    }

    #[test]
    fn result_in_precondition_is_error() {
        let behavior = behavior_with_precondition(Expr::Binary {
            op: BinaryOp::Neq,
            left: Box::new(Expr::Result {
                property: Some("id".to_string()),
                span: span(),
            }),
            right: Box::new(Expr::NullLiteral { span: span() }),
            span: span(),
        });
        let domain = domain_with_behavior(behavior);
        let symbols = SymbolTable::build(&domain);
        let mut outputs = crate::passes::PassOutputs::default();
        let mut ctx = PassContext {
            ast: &domain,
            file: "test.dsl",
            symbols: &symbols,
            outputs: &mut outputs,
        };
        let diagnostics = SymbolResolverPass.run(&mut ctx);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, "E0311");
        // Location points at the Result node, not the whole precondition (scenario D).
        assert_eq!(diagnostics[0].location.column, span().column);
    }

    #[test]
    fn unresolved_error_branch_reports_e0705() {
        let mut behavior = behavior_with_precondition(id("amount"));
        behavior.preconditions = vec![];
        behavior.postconditions = vec![PostconditionBlock {
            condition: PostConditionTarget::Named("NotFound".to_string()),
            predicates: vec![],
            span: span(),
        }];
        let domain = domain_with_behavior(behavior);
        let symbols = SymbolTable::build(&domain);
        let mut outputs = crate::passes::PassOutputs::default();
        let mut ctx = PassContext {
            ast: &domain,
            file: "test.dsl",
            symbols: &symbols,
            outputs: &mut outputs,
        };
        let diagnostics = SymbolResolverPass.run(&mut ctx);
        assert!(diagnostics.iter().any(|d| d.code == "E0705"));
    }
}
