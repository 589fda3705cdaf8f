//! Deterministic structural diff engine (spec §4.9, C12). Operates on two parsed
//! [`Domain`]s directly; nothing here reads from storage (that's the CLI's job).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Domain, EntityDecl, Expr, Field, QuantifierKind, TypeDecl, TypeDef, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Breaking,
    Compatible,
    Patch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    pub old_type: Option<String>,
    pub new_type: Option<String>,
    pub old_optional: Option<bool>,
    pub new_optional: Option<bool>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ExpressionDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarationChange {
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub field_changes: Vec<FieldChange>,
    #[serde(default)]
    pub invariant_diff: Option<ExpressionDiff>,
    #[serde(default)]
    pub precondition_diff: Option<ExpressionDiff>,
    #[serde(default)]
    pub success_type_change: Option<(String, String)>,
    #[serde(default)]
    pub error_diff: Option<(Vec<String>, Vec<String>)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<DeclarationChange>,
}

impl CategoryDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub breaking_changes: usize,
    pub compatible_changes: usize,
    pub patch_changes: usize,
    pub is_empty: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainDiff {
    pub types: CategoryDiff,
    pub entities: CategoryDiff,
    pub behaviors: CategoryDiff,
    pub summary: DiffSummary,
}

/// Serializes an expression to the diff engine's canonical form: fully parenthesized,
/// whitespace collapsed to single spaces (spec §4.9). Two expressions are considered
/// equal iff their canonical forms are byte-identical; commutativity is **not**
/// canonicalized (`a + b` != `b + a`), matching the source this spec was drawn from.
pub fn canonical_form(expr: &Expr) -> String {
    match expr {
        Expr::Identifier { name, .. } => name.clone(),
        Expr::QualifiedName { parts, .. } => parts.join("."),
        Expr::StringLiteral { value, .. } => format!("\"{value}\""),
        Expr::NumberLiteral { value, is_float, .. } => {
            if *is_float {
                format!("{value}")
            } else {
                format!("{}", *value as i64)
            }
        }
        Expr::BooleanLiteral { value, .. } => value.to_string(),
        Expr::NullLiteral { .. } => "null".to_string(),
        Expr::DurationLiteral { value, unit, .. } => format!("{value}{unit}"),
        Expr::RegexLiteral { pattern, .. } => format!("/{pattern}/"),
        Expr::Binary { op, left, right, .. } => format!(
            "({} {} {})",
            canonical_form(left),
            binary_op_token(*op),
            canonical_form(right)
        ),
        Expr::Unary { op, operand, .. } => {
            let token = match op {
                UnaryOp::Not => "not",
                UnaryOp::Neg => "-",
            };
            format!("({token} {})", canonical_form(operand))
        }
        Expr::Call { callee, args, .. } => format!(
            "({}({}))",
            canonical_form(callee),
            args.iter().map(canonical_form).collect::<Vec<_>>().join(", ")
        ),
        Expr::Member { object, property, .. } => format!("{}.{}", canonical_form(object), property),
        Expr::Index { object, index, .. } => {
            format!("{}[{}]", canonical_form(object), canonical_form(index))
        }
        Expr::Quantifier {
            kind,
            var,
            collection,
            predicate,
            ..
        } => {
            let token = match kind {
                QuantifierKind::ForAll => "forall",
                QuantifierKind::Exists => "exists",
            };
            format!(
                "({token} {var} in {}: {})",
                canonical_form(collection),
                canonical_form(predicate)
            )
        }
        Expr::Conditional {
            cond,
            then_branch,
            else_branch,
            ..
        } => format!(
            "(if {} then {} else {})",
            canonical_form(cond),
            canonical_form(then_branch),
            canonical_form(else_branch)
        ),
        Expr::Old { expr: inner, .. } => format!("old({})", canonical_form(inner)),
        Expr::Result { property, .. } => match property {
            Some(p) => format!("result.{p}"),
            None => "result".to_string(),
        },
        Expr::Input { property, .. } => format!("input.{property}"),
        Expr::Lambda { params, body, .. } => {
            format!("({}) => {}", params.join(", "), canonical_form(body))
        }
        Expr::ListExpr { elements, .. } => {
            format!("[{}]", elements.iter().map(canonical_form).collect::<Vec<_>>().join(", "))
        }
        Expr::MapExpr { entries, .. } => format!(
            "{{{}}}",
            entries
                .iter()
                .map(|(k, v)| format!("{}: {}", canonical_form(k), canonical_form(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn binary_op_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Neq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Implies => "implies",
        BinaryOp::Assign => "=",
    }
}

/// Diffs two expression lists as multisets of canonical forms, sorted for determinism
/// (spec §4.9).
fn diff_expr_multiset(old: &[Expr], new: &[Expr]) -> ExpressionDiff {
    let old_set: BTreeSet<String> = old.iter().map(canonical_form).collect();
    let new_set: BTreeSet<String> = new.iter().map(canonical_form).collect();
    ExpressionDiff {
        added: new_set.difference(&old_set).cloned().collect(),
        removed: old_set.difference(&new_set).cloned().collect(),
    }
}

fn type_name(def: &TypeDef) -> String {
    match def {
        TypeDef::Primitive { name } => name.clone(),
        TypeDef::Reference { qualified_name } => qualified_name.clone(),
        TypeDef::List { inner } => format!("List<{}>", type_name(inner)),
        TypeDef::Map { key, value } => format!("Map<{}, {}>", type_name(key), type_name(value)),
        TypeDef::Optional { inner } => format!("Optional<{}>", type_name(inner)),
        TypeDef::Constrained { base, .. } => type_name(base),
        TypeDef::Struct { .. } => "struct".to_string(),
        TypeDef::Union { variants } => variants.iter().map(type_name).collect::<Vec<_>>().join(" | "),
        TypeDef::Enum { variants } => format!("enum({})", variants.join(", ")),
    }
}

fn diff_fields(old: &[Field], new: &[Field]) -> Vec<FieldChange> {
    let old_map: BTreeMap<&str, &Field> = old.iter().map(|f| (f.name.as_str(), f)).collect();
    let new_map: BTreeMap<&str, &Field> = new.iter().map(|f| (f.name.as_str(), f)).collect();
    let names: BTreeSet<&str> = old_map.keys().chain(new_map.keys()).copied().collect();

    let mut changes = vec![];
    for name in names {
        match (old_map.get(name), new_map.get(name)) {
            (None, Some(f)) => {
                let severity = if f.optional {
                    Severity::Compatible
                } else {
                    Severity::Breaking
                };
                changes.push(FieldChange {
                    name: name.to_string(),
                    old_type: None,
                    new_type: Some(type_name(&f.type_)),
                    old_optional: None,
                    new_optional: Some(f.optional),
                    severity,
                });
            }
            (Some(_), None) => changes.push(FieldChange {
                name: name.to_string(),
                old_type: old_map.get(name).map(|f| type_name(&f.type_)),
                new_type: None,
                old_optional: old_map.get(name).map(|f| f.optional),
                new_optional: None,
                severity: Severity::Breaking,
            }),
            (Some(o), Some(n)) => {
                let type_changed = type_name(&o.type_) != type_name(&n.type_);
                let became_required = o.optional && !n.optional;
                if type_changed || became_required {
                    changes.push(FieldChange {
                        name: name.to_string(),
                        old_type: Some(type_name(&o.type_)),
                        new_type: Some(type_name(&n.type_)),
                        old_optional: Some(o.optional),
                        new_optional: Some(n.optional),
                        severity: Severity::Breaking,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }
    changes
}

fn worst(a: Severity, b: Severity) -> Severity {
    a.min(b)
}

fn diff_entities(old: &[EntityDecl], new: &[EntityDecl]) -> CategoryDiff {
    let old_map: BTreeMap<&str, &EntityDecl> = old.iter().map(|e| (e.name.as_str(), e)).collect();
    let new_map: BTreeMap<&str, &EntityDecl> = new.iter().map(|e| (e.name.as_str(), e)).collect();
    let names: BTreeSet<&str> = old_map.keys().chain(new_map.keys()).copied().collect();

    let mut diff = CategoryDiff::default();
    for name in names {
        match (old_map.get(name), new_map.get(name)) {
            (None, Some(_)) => diff.added.push(name.to_string()),
            (Some(_), None) => diff.removed.push(name.to_string()),
            (Some(o), Some(n)) => {
                let field_changes = diff_fields(&o.fields, &n.fields);
                let invariant_diff = diff_expr_multiset(&o.invariants, &n.invariants);
                let has_changes = !field_changes.is_empty() || !invariant_diff.is_empty();
                if has_changes {
                    let severity = field_changes
                        .iter()
                        .map(|f| f.severity)
                        .fold(Severity::Patch, worst);
                    diff.changed.push(DeclarationChange {
                        name: name.to_string(),
                        severity,
                        field_changes,
                        invariant_diff: Some(invariant_diff),
                        precondition_diff: None,
                        success_type_change: None,
                        error_diff: None,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }
    diff.added.sort();
    diff.removed.sort();
    diff.changed.sort_by(|a, b| a.name.cmp(&b.name));
    diff
}

fn diff_types(old: &[TypeDecl], new: &[TypeDecl]) -> CategoryDiff {
    let old_map: BTreeMap<&str, &TypeDecl> = old.iter().map(|t| (t.name.as_str(), t)).collect();
    let new_map: BTreeMap<&str, &TypeDecl> = new.iter().map(|t| (t.name.as_str(), t)).collect();
    let names: BTreeSet<&str> = old_map.keys().chain(new_map.keys()).copied().collect();

    let mut diff = CategoryDiff::default();
    for name in names {
        match (old_map.get(name), new_map.get(name)) {
            (None, Some(_)) => diff.added.push(name.to_string()),
            (Some(_), None) => diff.removed.push(name.to_string()),
            (Some(o), Some(n)) => {
                if type_name(&o.def) != type_name(&n.def) {
                    diff.changed.push(DeclarationChange {
                        name: name.to_string(),
                        severity: Severity::Breaking,
                        field_changes: vec![],
                        invariant_diff: None,
                        precondition_diff: None,
                        success_type_change: Some((type_name(&o.def), type_name(&n.def))),
                        error_diff: None,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }
    diff.added.sort();
    diff.removed.sort();
    diff.changed.sort_by(|a, b| a.name.cmp(&b.name));
    diff
}

fn diff_behaviors(old: &Domain, new: &Domain) -> CategoryDiff {
    let old_map: BTreeMap<&str, &crate::ast::Behavior> =
        old.behaviors.iter().map(|b| (b.name.as_str(), b)).collect();
    let new_map: BTreeMap<&str, &crate::ast::Behavior> =
        new.behaviors.iter().map(|b| (b.name.as_str(), b)).collect();
    let names: BTreeSet<&str> = old_map.keys().chain(new_map.keys()).copied().collect();

    let mut diff = CategoryDiff::default();
    for name in names {
        match (old_map.get(name), new_map.get(name)) {
            (None, Some(_)) => diff.added.push(name.to_string()),
            (Some(_), None) => diff.removed.push(name.to_string()),
            (Some(o), Some(n)) => {
                let precondition_diff = diff_expr_multiset(&o.preconditions, &n.preconditions);
                let success_changed = type_name(&o.output.success) != type_name(&n.output.success);
                let old_errors: BTreeSet<&str> =
                    o.output.errors.iter().map(|e| e.name.as_str()).collect();
                let new_errors: BTreeSet<&str> =
                    n.output.errors.iter().map(|e| e.name.as_str()).collect();
                let removed_errors: Vec<String> =
                    old_errors.difference(&new_errors).map(|s| s.to_string()).collect();
                let added_errors: Vec<String> =
                    new_errors.difference(&old_errors).map(|s| s.to_string()).collect();
                let error_changed = !removed_errors.is_empty() || !added_errors.is_empty();

                let field_changes = diff_fields(&o.input, &n.input);

                let has_changes = !precondition_diff.is_empty()
                    || success_changed
                    || error_changed
                    || !field_changes.is_empty();

                if has_changes {
                    // Adding a precondition is breaking; the heuristic for "loosened"
                    // is: something was removed and nothing new was added (spec §4.9).
                    let precondition_severity = if !precondition_diff.added.is_empty() {
                        Severity::Breaking
                    } else if !precondition_diff.removed.is_empty() {
                        Severity::Compatible
                    } else {
                        Severity::Patch
                    };
                    let mut severity = precondition_severity;
                    if success_changed {
                        severity = worst(severity, Severity::Breaking);
                    }
                    if !removed_errors.is_empty() {
                        severity = worst(severity, Severity::Breaking);
                    } else if !added_errors.is_empty() {
                        severity = worst(severity, Severity::Compatible);
                    }
                    for f in &field_changes {
                        severity = worst(severity, f.severity);
                    }

                    diff.changed.push(DeclarationChange {
                        name: name.to_string(),
                        severity,
                        field_changes,
                        invariant_diff: None,
                        precondition_diff: Some(precondition_diff),
                        success_type_change: success_changed
                            .then(|| (type_name(&o.output.success), type_name(&n.output.success))),
                        error_diff: error_changed.then(|| (removed_errors, added_errors)),
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }
    diff.added.sort();
    diff.removed.sort();
    diff.changed.sort_by(|a, b| a.name.cmp(&b.name));
    diff
}

/// Diffs two parsed domains (spec §4.9). `diff(a, a)` is always empty (spec §7,
/// "diff stability").
pub fn diff_domains(old: &Domain, new: &Domain) -> DomainDiff {
    let types = diff_types(&old.types, &new.types);
    let entities = diff_entities(&old.entities, &new.entities);
    let behaviors = diff_behaviors(old, new);

    let mut breaking = 0;
    let mut compatible = 0;
    let mut patch = 0;

    for category in [&types, &entities, &behaviors] {
        // Adding an entity/behavior/type is compatible; removing one is breaking
        // (spec §4.9).
        compatible += category.added.len();
        breaking += category.removed.len();
        for change in &category.changed {
            match change.severity {
                Severity::Breaking => breaking += 1,
                Severity::Compatible => compatible += 1,
                Severity::Patch => patch += 1,
            }
        }
    }

    let is_empty = types.is_empty() && entities.is_empty() && behaviors.is_empty();

    DomainDiff {
        types,
        entities,
        behaviors,
        summary: DiffSummary {
            breaking_changes: breaking,
            compatible_changes: compatible,
            patch_changes: patch,
            is_empty,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Domain, EntityDecl, Field, Span, TypeDef};

    fn span() -> Span {
        Span::test(1, 1)
    }

    fn domain_with_entity(entity: EntityDecl) -> Domain {
        Domain {
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            imports: vec![],
            types: vec![],
            entities: vec![entity],
            behaviors: vec![],
            invariants: vec![],
            policies: vec![],
            views: vec![],
            scenarios: vec![],
            chaos: vec![],
            span: span(),
        }
    }

    fn field(name: &str, type_name: &str) -> Field {
        Field {
            name: name.to_string(),
            type_: TypeDef::Primitive {
                name: type_name.to_string(),
            },
            optional: false,
            annotations: vec![],
            span: span(),
        }
    }

    #[test]
    fn identical_domains_diff_to_empty() {
        let domain = domain_with_entity(EntityDecl {
            name: "User".to_string(),
            fields: vec![field("email", "String")],
            invariants: vec![],
            span: span(),
        });
        let diff = diff_domains(&domain, &domain);
        assert!(diff.summary.is_empty);
        assert_eq!(diff.summary.breaking_changes, 0);
    }

    #[test]
    fn field_type_change_is_breaking() {
        let a = domain_with_entity(EntityDecl {
            name: "User".to_string(),
            fields: vec![field("email", "String")],
            invariants: vec![],
            span: span(),
        });
        let b = domain_with_entity(EntityDecl {
            name: "User".to_string(),
            fields: vec![field("email", "Int")],
            invariants: vec![],
            span: span(),
        });
        let diff = diff_domains(&a, &b);
        assert_eq!(diff.summary.breaking_changes, 1);
        let change = &diff.entities.changed[0];
        assert_eq!(change.name, "User");
        assert_eq!(change.severity, Severity::Breaking);
        assert_eq!(change.field_changes[0].old_type.as_deref(), Some("String"));
        assert_eq!(change.field_changes[0].new_type.as_deref(), Some("Int"));
    }

    #[test]
    fn canonical_form_is_deterministic() {
        let expr = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::Identifier {
                name: "a".to_string(),
                span: span(),
            }),
            right: Box::new(Expr::Identifier {
                name: "b".to_string(),
                span: span(),
            }),
            span: span(),
        };
        assert_eq!(canonical_form(&expr), canonical_form(&expr));
        assert_eq!(canonical_form(&expr), "(a + b)");
    }
}
