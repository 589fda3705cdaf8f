//! Full-pipeline coverage for the pass framework's headline scenarios: unsatisfiable
//! numeric bounds, a non-exhaustive enum guard, and `result` referenced from a
//! precondition. Each test builds a `Domain` by hand (no parser in this crate) and runs
//! it through `PassRunner::with_default_passes()`, the same entry point a caller of this
//! crate uses.

use domainspec_verify::ast::{
    Behavior, BinaryOp, Domain, Expr, Field, Output, PostconditionBlock, Span, TypeDecl, TypeDef,
};
use domainspec_verify::passes::PassRunner;

fn span() -> Span {
    Span {
        file: std::sync::Arc::from("test.dsl"),
        line: 1,
        column: 1,
        end_line: 1,
        end_column: 1,
        byte_offset: 0,
    }
}

fn identifier(name: &str) -> Expr {
    Expr::Identifier {
        name: name.to_string(),
        span: span(),
    }
}

fn number(v: f64) -> Expr {
    Expr::NumberLiteral {
        value: v,
        is_float: false,
        span: span(),
    }
}

fn empty_domain(behaviors: Vec<Behavior>) -> Domain {
    Domain {
        name: "Test".to_string(),
        version: "1.0.0".to_string(),
        imports: vec![],
        types: vec![],
        entities: vec![],
        behaviors,
        invariants: vec![],
        policies: vec![],
        views: vec![],
        scenarios: vec![],
        chaos: vec![],
        span: span(),
    }
}

#[test]
fn unsatisfiable_numeric_bounds_reported_exactly_once() {
    let behavior = Behavior {
        name: "Withdraw".to_string(),
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
        preconditions: vec![
            Expr::Binary {
                op: BinaryOp::Gt,
                left: Box::new(identifier("amount")),
                right: Box::new(number(100.0)),
                span: span(),
            },
            Expr::Binary {
                op: BinaryOp::Lt,
                left: Box::new(identifier("amount")),
                right: Box::new(number(50.0)),
                span: span(),
            },
        ],
        postconditions: vec![],
        invariants: vec![],
        temporal: vec![],
        security: vec![],
        compliance: vec![],
        span: span(),
    };

    let domain = empty_domain(vec![behavior]);
    let diagnostics = PassRunner::with_default_passes()
        .run(&domain, "withdraw.dsl")
        .expect("pass framework setup should not fail");

    let bound_errors: Vec<_> = diagnostics.iter().filter(|d| d.code == "E0310").collect();
    assert_eq!(bound_errors.len(), 1);
    assert!(bound_errors[0].message.contains("amount"));
}

#[test]
fn non_exhaustive_enum_guard_names_every_missing_variant() {
    let status_eq = |variant: &str| Expr::Binary {
        op: BinaryOp::Eq,
        left: Box::new(identifier("status")),
        right: Box::new(Expr::QualifiedName {
            parts: vec!["PaymentStatus".to_string(), variant.to_string()],
            span: span(),
        }),
        span: span(),
    };

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
            success: TypeDef::Primitive {
                name: "Boolean".to_string(),
            },
            errors: vec![],
        },
        preconditions: vec![status_eq("Pending"), status_eq("Completed")],
        postconditions: vec![],
        invariants: vec![],
        temporal: vec![],
        security: vec![],
        compliance: vec![],
        span: span(),
    };

    let mut domain = empty_domain(vec![behavior]);
    domain.types.push(TypeDecl {
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
    });

    let diagnostics = PassRunner::with_default_passes()
        .run(&domain, "process.dsl")
        .expect("pass framework setup should not fail");

    let guard = diagnostics
        .iter()
        .find(|d| d.code == "E0701")
        .expect("missing-variant diagnostic");
    assert!(guard.message.contains("Processing"));
    assert!(guard.message.contains("Failed"));
    assert!(guard.message.contains("Refunded"));
}

#[test]
fn result_in_precondition_points_at_the_result_node_not_the_whole_expression() {
    let result_span = Span {
        file: std::sync::Arc::from("test.dsl"),
        line: 7,
        column: 20,
        end_line: 7,
        end_column: 26,
        byte_offset: 120,
    };
    let precondition = Expr::Binary {
        op: BinaryOp::Neq,
        left: Box::new(Expr::Result {
            property: Some("id".to_string()),
            span: result_span.clone(),
        }),
        right: Box::new(Expr::NullLiteral { span: span() }),
        span: span(),
    };

    let behavior = Behavior {
        name: "Lookup".to_string(),
        description: None,
        actors: vec![],
        input: vec![],
        output: Output {
            success: TypeDef::Primitive {
                name: "Boolean".to_string(),
            },
            errors: vec![],
        },
        preconditions: vec![precondition],
        postconditions: vec![PostconditionBlock {
            condition: domainspec_verify::ast::PostConditionTarget::Success,
            predicates: vec![],
            span: span(),
        }],
        invariants: vec![],
        temporal: vec![],
        security: vec![],
        compliance: vec![],
        span: span(),
    };

    let domain = empty_domain(vec![behavior]);
    let diagnostics = PassRunner::with_default_passes()
        .run(&domain, "lookup.dsl")
        .expect("pass framework setup should not fail");

    let result_errors: Vec<_> = diagnostics.iter().filter(|d| d.code == "E0311").collect();
    assert_eq!(result_errors.len(), 1);
    assert_eq!(result_errors[0].location.line, result_span.line);
    assert_eq!(result_errors[0].location.column, result_span.column);
}
