//! Exhaustiveness pass (spec §4.4, C7): enum guard coverage, redundant/overlapping
//! variant guards, and declared-error postcondition coverage.

use std::collections::BTreeMap;

use crate::ast::{Behavior, Domain, Expr, PostConditionTarget, TypeDef};
use crate::diagnostics::{Diagnostic, Severity};
use crate::passes::{Pass, PassContext, PassId};
use crate::symbols::SymbolTable;

pub struct ExhaustivenessPass;

impl Pass for ExhaustivenessPass {
    fn id(&self) -> PassId {
        "exhaustiveness"
    }
    fn name(&self) -> &str {
        "Exhaustiveness pass"
    }
    fn description(&self) -> &str {
        "Enum guard coverage, error-branch coverage, and redundant pattern detection"
    }
    fn dependencies(&self) -> &[PassId] {
        &["resolver"]
    }

    fn run(&self, ctx: &mut PassContext) -> Vec<Diagnostic> {
        let mut diagnostics = vec![];
        for behavior in &ctx.ast.behaviors {
            check_enum_guards(behavior, ctx.ast, ctx.symbols, &mut diagnostics);
            check_error_coverage(behavior, &mut diagnostics);
        }
        diagnostics
    }
}

/// The variable -> declared-enum-type map a behavior's input fields define, limited to
/// fields whose declared type is a known enum (spec §4.4's "known enum EnumT").
fn enum_typed_inputs<'a>(behavior: &'a Behavior, symbols: &SymbolTable) -> BTreeMap<&'a str, &'a str> {
    let mut map = BTreeMap::new();
    for field in &behavior.input {
        if let TypeDef::Reference { qualified_name } = &field.type_ {
            if symbols.enum_variants(qualified_name).is_some() {
                map.insert(field.name.as_str(), qualified_name.as_str());
            }
        }
    }
    map
}

/// Extracts `(variable, enumType, variant)` if `expr` is an equality comparison between
/// one of `typed_vars`'s variables and a variant of its declared enum — either
/// `x == EnumT.V` (qualified name) or `x == "v"` (string literal matched against the
/// variable's own enum).
fn variant_guard<'a>(
    expr: &Expr,
    typed_vars: &BTreeMap<&'a str, &'a str>,
    symbols: &SymbolTable,
) -> Option<(&'a str, &'a str, String)> {
    let Expr::Binary {
        op: crate::ast::BinaryOp::Eq,
        left,
        right,
        ..
    } = expr
    else {
        return None;
    };
    for (var_side, other_side) in [(left.as_ref(), right.as_ref()), (right.as_ref(), left.as_ref())] {
        let Expr::Identifier { name, .. } = var_side else {
            continue;
        };
        let Some((&var_name, &enum_name)) = typed_vars.get_key_value(name.as_str()) else {
            continue;
        };
        match other_side {
            Expr::QualifiedName { parts, .. } if parts.len() == 2 && parts[0] == enum_name => {
                if symbols
                    .enum_variants(enum_name)
                    .is_some_and(|vs| vs.iter().any(|v| v == &parts[1]))
                {
                    return Some((var_name, enum_name, parts[1].clone()));
                }
            }
            Expr::StringLiteral { value, .. } => {
                if symbols
                    .enum_variants(enum_name)
                    .is_some_and(|vs| vs.iter().any(|v| v == value))
                {
                    return Some((var_name, enum_name, value.clone()));
                }
            }
            _ => {}
        }
    }
    None
}

fn check_enum_guards(
    behavior: &Behavior,
    _domain: &Domain,
    symbols: &SymbolTable,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let typed_vars = enum_typed_inputs(behavior, symbols);
    if typed_vars.is_empty() {
        return;
    }

    // (var, enumT) -> variant -> count, keeping one representative span per variant.
    let mut groups: BTreeMap<(&str, &str), BTreeMap<String, (usize, crate::ast::Span)>> = BTreeMap::new();

    let all_clauses: Vec<&Expr> = behavior
        .preconditions
        .iter()
        .chain(behavior.postconditions.iter().flat_map(|b| b.predicates.iter()))
        .collect();

    for clause in &all_clauses {
        crate::ast::walk_expr(clause, &mut |node| {
            if let Some((var, enum_name, variant)) = variant_guard(node, &typed_vars, symbols) {
                let entry = groups
                    .entry((var, enum_name))
                    .or_default()
                    .entry(variant)
                    .or_insert((0, node.span().clone()));
                entry.0 += 1;
            }
            if let Expr::Conditional { cond, .. } = node {
                if let Some((_, enum_name, _)) = variant_guard(cond, &typed_vars, symbols) {
                    if symbols.enum_variants(enum_name).map(|v| v.len()).unwrap_or(0) >= 3 {
                        diagnostics.push(
                            Diagnostic::new(
                                "E0704",
                                "exhaustiveness",
                                Severity::Hint,
                                format!(
                                    "conditional compares against a single variant of '{enum_name}', which has 3 or more variants; consider an exhaustive match instead"
                                ),
                                node.span(),
                            ),
                        );
                    }
                }
            }
        });
    }

    for ((var, enum_name), variants) in &groups {
        for (variant, (count, span)) in variants {
            if *count > 1 {
                diagnostics.push(Diagnostic::new(
                    "E0702",
                    "exhaustiveness",
                    Severity::Warning,
                    format!("redundant guard: '{var}' is compared against '{enum_name}.{variant}' {count} times"),
                    span,
                ));
            }
        }

        let Some(all_variants) = symbols.enum_variants(enum_name) else {
            continue;
        };
        let covered: Vec<&String> = variants.keys().collect();
        if covered.is_empty() || covered.len() >= all_variants.len() {
            continue;
        }
        let missing: Vec<&String> = all_variants
            .iter()
            .filter(|v| !variants.contains_key(*v))
            .collect();
        if missing.is_empty() {
            continue;
        }
        let any_span = variants.values().next().map(|(_, s)| s.clone());
        if let Some(span) = any_span {
            diagnostics.push(Diagnostic::new(
                "E0701",
                "exhaustiveness",
                Severity::Error,
                format!(
                    "'{var}' is only guarded for {covered} of {total} variants of '{enum_name}'; missing: {missing}",
                    covered = covered.len(),
                    total = all_variants.len(),
                    missing = missing
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                &span,
            ));
        }
    }
}

fn check_error_coverage(behavior: &Behavior, diagnostics: &mut Vec<Diagnostic>) {
    if behavior.output.errors.is_empty() {
        return;
    }
    if behavior.postconditions.is_empty() {
        diagnostics.push(Diagnostic::new(
            "E0705",
            "exhaustiveness",
            Severity::Error,
            format!(
                "behavior '{}' declares {} error(s) but has no postconditions at all",
                behavior.name,
                behavior.output.errors.len()
            ),
            &behavior.span,
        ));
        return;
    }

    let has_catch_all = behavior
        .postconditions
        .iter()
        .any(|b| matches!(b.condition, PostConditionTarget::AnyError));
    if has_catch_all {
        return;
    }

    let covered: Vec<&str> = behavior
        .postconditions
        .iter()
        .filter_map(|b| match &b.condition {
            PostConditionTarget::Named(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    for error in &behavior.output.errors {
        if !covered.contains(&error.name.as_str()) {
            diagnostics.push(Diagnostic::new(
                "E0705",
                "exhaustiveness",
                Severity::Error,
                format!(
                    "declared error '{}' of behavior '{}' has no matching postcondition branch and no catch-all 'any_error' branch",
                    error.name, behavior.name
                ),
                &error.span,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Field, Output, PostconditionBlock, Span, TypeDecl};
    use crate::passes::PassOutputs;

    fn span() -> Span {
        Span::test(1, 1)
    }

    fn payment_status_domain(preconditions: Vec<Expr>) -> Domain {
        let behavior = Behavior {
            name: "Process".to_string(),
            description: None,
            actors: vec![],
            input: vec![Field {
                name: "status".to_string(),
                type_: TypeDef::Reference {
                    qualified_name: "PaymentStatus".to_string(),
                },
                optional: false,
                annotations: vec![],
                span: span(),
            }],
            output: Output {
                success: TypeDef::Primitive { name: "Boolean".to_string() },
                errors: vec![],
            },
            preconditions,
            postconditions: vec![],
            invariants: vec![],
            temporal: vec![],
            security: vec![],
            compliance: vec![],
            span: span(),
        };
        Domain {
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            imports: vec![],
            types: vec![TypeDecl {
                name: "PaymentStatus".to_string(),
                def: TypeDef::Enum {
                    variants: vec![
                        "Pending".to_string(),
                        "Processing".to_string(),
                        "Completed".to_string(),
                        "Failed".to_string(),
                        "Refunded".to_string(),
                    ],
                },
                span: span(),
            }],
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

    fn status_eq(variant: &str) -> Expr {
        Expr::Binary {
            op: BinaryOp::Eq,
            left: Box::new(Expr::Identifier {
                name: "status".to_string(),
                span: span(),
            }),
            right: Box::new(Expr::QualifiedName {
                parts: vec!["PaymentStatus".to_string(), variant.to_string()],
                span: span(),
            }),
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
        ExhaustivenessPass.run(&mut ctx)
    }

    #[test]
    fn non_exhaustive_enum_guard_reports_missing_variants() {
        let domain = payment_status_domain(vec![status_eq("Pending"), status_eq("Completed")]);
        let diagnostics = run_pass(&domain);
        let diag = diagnostics.iter().find(|d| d.code == "E0701").unwrap();
        assert!(diag.message.contains("Processing"));
        assert!(diag.message.contains("Failed"));
        assert!(diag.message.contains("Refunded"));
    }

    #[test]
    fn duplicate_guard_is_redundant() {
        let domain = payment_status_domain(vec![
            status_eq("Pending"),
            status_eq("Pending"),
            status_eq("Processing"),
            status_eq("Completed"),
            status_eq("Failed"),
            status_eq("Refunded"),
        ]);
        let diagnostics = run_pass(&domain);
        assert!(diagnostics.iter().any(|d| d.code == "E0702"));
    }

    #[test]
    fn unmatched_declared_error_reports_e0705() {
        let mut domain = payment_status_domain(vec![]);
        domain.behaviors[0].output.errors = vec![crate::ast::ErrorSpec {
            name: "NotFound".to_string(),
            span: span(),
        }];
        domain.behaviors[0].postconditions = vec![PostconditionBlock {
            condition: PostConditionTarget::Success,
            predicates: vec![],
            span: span(),
        }];
        let diagnostics = run_pass(&domain);
        assert!(diagnostics.iter().any(|d| d.code == "E0705"));
    }
}
