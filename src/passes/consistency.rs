//! Consistency/unused pass (spec §4.5, C8): numeric-bound satisfiability, output-in-
//! precondition, undefined postcondition fields, and unused-symbol hints.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{walk_expr, BinaryOp, Domain, Expr, TypeDef};
use crate::diagnostics::{Diagnostic, Severity};
use crate::passes::{Pass, PassContext, PassId};
use crate::symbols::SymbolTable;

/// Entity fields every domain carries implicitly; never flagged unused (spec §4.5).
const IMPLICIT_ENTITY_FIELDS: &[&str] = &[
    "id", "createdAt", "updatedAt", "version", "deleted", "createdBy", "updatedBy", "tenantId",
];

pub struct ConsistencyUnusedPass;

impl Pass for ConsistencyUnusedPass {
    fn id(&self) -> PassId {
        "consistency"
    }
    fn name(&self) -> &str {
        "Consistency/unused pass"
    }
    fn description(&self) -> &str {
        "Numeric-bound satisfiability, output-in-precondition, undefined postcondition fields, unused symbols"
    }
    fn dependencies(&self) -> &[PassId] {
        &["resolver"]
    }

    fn run(&self, ctx: &mut PassContext) -> Vec<Diagnostic> {
        let resolver_ran = ctx.pass_ran("resolver");
        let mut diagnostics = vec![];
        for behavior in &ctx.ast.behaviors {
            check_numeric_bounds(behavior, &mut diagnostics);
            if !resolver_ran {
                check_output_in_precondition(behavior, &mut diagnostics);
            }
            check_undefined_postcondition_fields(behavior, ctx.symbols, &mut diagnostics);
        }
        check_unused_symbols(ctx.ast, ctx.symbols, &mut diagnostics);
        diagnostics
    }
}

#[derive(Debug, Clone, Copy)]
struct Bound {
    value: f64,
    inclusive: bool,
}

/// Extracts a half-plane bound from `v op literal` / `literal op v`, returning
/// `(is_lower, bound)` (spec §4.5).
fn half_plane(op: BinaryOp, var_on_left: bool, literal: f64) -> Option<(bool, Bound)> {
    // Normalize so `op` always reads left-to-right as written; flip when the variable
    // is on the right (`5 < v` means `v > 5`, a lower bound).
    let effective_op = if var_on_left {
        op
    } else {
        match op {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Lte => BinaryOp::Gte,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Gte => BinaryOp::Lte,
            other => other,
        }
    };
    match effective_op {
        BinaryOp::Gt => Some((true, Bound { value: literal, inclusive: false })),
        BinaryOp::Gte => Some((true, Bound { value: literal, inclusive: true })),
        BinaryOp::Lt => Some((false, Bound { value: literal, inclusive: false })),
        BinaryOp::Lte => Some((false, Bound { value: literal, inclusive: true })),
        _ => None,
    }
}

fn var_and_literal(expr: &Expr) -> Option<(String, bool, f64, BinaryOp)> {
    let Expr::Binary { op, left, right, .. } = expr else {
        return None;
    };
    if !matches!(
        op,
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
    ) {
        return None;
    }
    match (left.as_ref(), right.as_ref()) {
        (Expr::Identifier { name, .. }, Expr::NumberLiteral { value, .. }) => {
            Some((name.clone(), true, *value, *op))
        }
        (Expr::NumberLiteral { value, .. }, Expr::Identifier { name, .. }) => {
            Some((name.clone(), false, *value, *op))
        }
        _ => None,
    }
}

fn check_numeric_bounds(behavior: &crate::ast::Behavior, diagnostics: &mut Vec<Diagnostic>) {
    let mut lower: BTreeMap<String, (Bound, Expr)> = BTreeMap::new();
    let mut upper: BTreeMap<String, (Bound, Expr)> = BTreeMap::new();

    for precondition in &behavior.preconditions {
        for conjunct in crate::ast::flatten_conjuncts(precondition) {
            let Some((var, var_on_left, literal, op)) = var_and_literal(conjunct) else {
                continue;
            };
            let Some((is_lower, bound)) = half_plane(op, var_on_left, literal) else {
                continue;
            };
            if is_lower {
                lower.insert(var, (bound, conjunct.clone()));
            } else {
                upper.insert(var, (bound, conjunct.clone()));
            }
        }
    }

    for (var, (lo, lo_expr)) in &lower {
        let Some((hi, hi_expr)) = upper.get(var) else {
            continue;
        };
        let unsat = lo.value > hi.value || (lo.value == hi.value && (!lo.inclusive || !hi.inclusive));
        if unsat {
            diagnostics.push(
                Diagnostic::new(
                    "E0310",
                    "consistency",
                    Severity::Error,
                    format!(
                        "'{var}' has unsatisfiable numeric bounds: lower {} {}, upper {} {}",
                        if lo.inclusive { ">=" } else { ">" },
                        lo.value,
                        if hi.inclusive { "<=" } else { "<" },
                        hi.value
                    ),
                    lo_expr.span(),
                )
                .with_related(hi_expr.span(), "conflicting upper bound here"),
            );
        }
    }
}

fn check_output_in_precondition(behavior: &crate::ast::Behavior, diagnostics: &mut Vec<Diagnostic>) {
    for precondition in &behavior.preconditions {
        walk_expr(precondition, &mut |node| {
            if let Expr::Result { span, .. } = node {
                diagnostics.push(Diagnostic::new(
                    "E0311",
                    "consistency",
                    Severity::Error,
                    "result is not available in a precondition",
                    span,
                ));
            }
        });
    }
}

fn check_undefined_postcondition_fields(
    behavior: &crate::ast::Behavior,
    symbols: &SymbolTable,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(available) = struct_field_names(&behavior.output.success, symbols) else {
        return;
    };
    for block in &behavior.postconditions {
        for predicate in &block.predicates {
            walk_expr(predicate, &mut |node| {
                if let Expr::Result {
                    property: Some(field),
                    span,
                } = node
                {
                    if !available.iter().any(|f| f == field) {
                        diagnostics.push(Diagnostic::new(
                            "E0312",
                            "consistency",
                            Severity::Error,
                            format!(
                                "'result.{field}' is not a field of behavior '{}''s success type; available fields: {}",
                                behavior.name,
                                available.join(", ")
                            ),
                            span,
                        ));
                    }
                }
            });
        }
    }
}

fn struct_field_names(type_def: &TypeDef, symbols: &SymbolTable) -> Option<Vec<String>> {
    match type_def {
        TypeDef::Struct { fields } => Some(fields.iter().map(|f| f.name.clone()).collect()),
        TypeDef::Reference { qualified_name } => symbols
            .struct_fields(qualified_name)
            .map(|f| f.iter().cloned().collect()),
        _ => None,
    }
}

fn check_unused_symbols(domain: &Domain, symbols: &SymbolTable, diagnostics: &mut Vec<Diagnostic>) {
    let mut referenced_names: BTreeSet<String> = BTreeSet::new();
    let mut referenced_member_properties: BTreeSet<String> = BTreeSet::new();

    fn visit(expr: &Expr, referenced_names: &mut BTreeSet<String>, referenced_member_properties: &mut BTreeSet<String>) {
        walk_expr(expr, &mut |node| match node {
            Expr::Identifier { name, .. } => {
                referenced_names.insert(name.clone());
            }
            Expr::QualifiedName { parts, .. } => {
                if let Some(first) = parts.first() {
                    referenced_names.insert(first.clone());
                }
            }
            Expr::Member { property, .. } => {
                referenced_member_properties.insert(property.clone());
            }
            _ => {}
        });
    }

    for behavior in &domain.behaviors {
        for e in &behavior.preconditions {
            visit(e, &mut referenced_names, &mut referenced_member_properties);
        }
        for block in &behavior.postconditions {
            for e in &block.predicates {
                visit(e, &mut referenced_names, &mut referenced_member_properties);
            }
        }
        for e in &behavior.invariants {
            visit(e, &mut referenced_names, &mut referenced_member_properties);
        }
        for e in &behavior.temporal {
            visit(e, &mut referenced_names, &mut referenced_member_properties);
        }
        for e in &behavior.security {
            visit(e, &mut referenced_names, &mut referenced_member_properties);
        }
        for e in &behavior.compliance {
            visit(e, &mut referenced_names, &mut referenced_member_properties);
        }
    }
    for entity in &domain.entities {
        for e in &entity.invariants {
            visit(e, &mut referenced_names, &mut referenced_member_properties);
        }
    }
    for inv in &domain.invariants {
        visit(&inv.expr, &mut referenced_names, &mut referenced_member_properties);
    }
    for policy in &domain.policies {
        for r in &policy.rules {
            visit(r, &mut referenced_names, &mut referenced_member_properties);
        }
    }
    for scenario in &domain.scenarios {
        for s in &scenario.steps {
            visit(s, &mut referenced_names, &mut referenced_member_properties);
        }
    }
    for chaos in &domain.chaos {
        referenced_names.insert(chaos.target.clone());
        for c in &chaos.conditions {
            visit(c, &mut referenced_names, &mut referenced_member_properties);
        }
    }

    // Types/entities are also "used" by appearing as a field's declared type anywhere.
    let mut referenced_types: BTreeSet<String> = BTreeSet::new();
    collect_type_refs_in_domain(domain, &mut referenced_types);

    for entity in &domain.entities {
        let used = referenced_names.contains(&entity.name) || referenced_types.contains(&entity.name);
        if !used {
            diagnostics.push(Diagnostic::new(
                "E0320",
                "consistency",
                Severity::Hint,
                format!("entity '{}' is never referenced", entity.name),
                &entity.span,
            ));
        }
        for field in &entity.fields {
            if IMPLICIT_ENTITY_FIELDS.contains(&field.name.as_str()) {
                continue;
            }
            if !referenced_member_properties.contains(&field.name) && !referenced_names.contains(&field.name) {
                diagnostics.push(Diagnostic::new(
                    "E0324",
                    "consistency",
                    Severity::Hint,
                    format!("field '{}' of entity '{}' is never referenced", field.name, entity.name),
                    &field.span,
                ));
            }
        }
    }

    for type_decl in &domain.types {
        let used = referenced_names.contains(&type_decl.name) || referenced_types.contains(&type_decl.name);
        if !used {
            diagnostics.push(Diagnostic::new(
                "E0321",
                "consistency",
                Severity::Hint,
                format!("type '{}' is never referenced", type_decl.name),
                &type_decl.span,
            ));
        }
    }

    for behavior in &domain.behaviors {
        let mut behavior_names: BTreeSet<String> = BTreeSet::new();
        let mut behavior_inputs: BTreeSet<String> = BTreeSet::new();
        let mut behavior_results: BTreeSet<String> = BTreeSet::new();
        let mut scan = |expr: &Expr| {
            walk_expr(expr, &mut |node| match node {
                Expr::Identifier { name, .. } => {
                    behavior_names.insert(name.clone());
                }
                Expr::Input { property, .. } => {
                    behavior_inputs.insert(property.clone());
                }
                Expr::Result {
                    property: Some(p), ..
                } => {
                    behavior_results.insert(p.clone());
                }
                _ => {}
            });
        };
        for e in &behavior.preconditions {
            scan(e);
        }
        for block in &behavior.postconditions {
            for e in &block.predicates {
                scan(e);
            }
        }
        for e in behavior
            .invariants
            .iter()
            .chain(behavior.temporal.iter())
            .chain(behavior.security.iter())
            .chain(behavior.compliance.iter())
        {
            scan(e);
        }

        for field in &behavior.input {
            if !behavior_names.contains(&field.name) && !behavior_inputs.contains(&field.name) {
                diagnostics.push(Diagnostic::new(
                    "E0322",
                    "consistency",
                    Severity::Hint,
                    format!(
                        "input field '{}' of behavior '{}' is never referenced",
                        field.name, behavior.name
                    ),
                    &field.span,
                ));
            }
        }

        if let Some(fields) = struct_field_names(&behavior.output.success, symbols) {
            for field in fields {
                if !behavior_results.contains(&field) {
                    diagnostics.push(Diagnostic::new(
                        "E0323",
                        "consistency",
                        Severity::Hint,
                        format!(
                            "output field '{field}' of behavior '{}' is never referenced via result.{field}",
                            behavior.name
                        ),
                        &behavior.span,
                    ));
                }
            }
        }
    }
}

fn collect_type_refs_in_domain(domain: &Domain, out: &mut BTreeSet<String>) {
    for t in &domain.types {
        collect_type_refs(&t.def, out);
    }
    for e in &domain.entities {
        for f in &e.fields {
            collect_type_refs(&f.type_, out);
        }
    }
    for b in &domain.behaviors {
        for f in &b.input {
            collect_type_refs(&f.type_, out);
        }
        collect_type_refs(&b.output.success, out);
    }
    for v in &domain.views {
        for f in &v.fields {
            collect_type_refs(&f.type_, out);
        }
    }
}

fn collect_type_refs(def: &TypeDef, out: &mut BTreeSet<String>) {
    match def {
        TypeDef::Reference { qualified_name } => {
            out.insert(qualified_name.clone());
        }
        TypeDef::List { inner } | TypeDef::Optional { inner } => collect_type_refs(inner, out),
        TypeDef::Map { key, value } => {
            collect_type_refs(key, out);
            collect_type_refs(value, out);
        }
        TypeDef::Constrained { base, .. } => collect_type_refs(base, out),
        TypeDef::Struct { fields } => {
            for f in fields {
                collect_type_refs(&f.type_, out);
            }
        }
        TypeDef::Union { variants } => {
            for v in variants {
                collect_type_refs(v, out);
            }
        }
        TypeDef::Primitive { .. } | TypeDef::Enum { .. } => {}
    }
}
