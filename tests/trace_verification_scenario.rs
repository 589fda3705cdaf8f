//! Drives the full orchestrator — passes, trace evaluation, and SMT resolution — for a
//! behavior whose precondition and postcondition are both backed by a recorded trace,
//! checking that clause evidence comes back `Proven` end to end.

use std::sync::Arc;

use domainspec_verify::ast::{
    Behavior, Domain, Expr, Field, Output, PostConditionTarget, PostconditionBlock, Span, TypeDef,
};
use domainspec_verify::orchestrator::{Orchestrator, RunInput};
use domainspec_verify::trace::{CheckEvent, ClauseStatus, Event, StateChange, Trace};

fn span() -> Span {
    Span {
        file: Arc::from("oauth.dsl"),
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

fn oauth_exchange_domain() -> Domain {
    let behavior = Behavior {
        name: "ExchangeAuthorizationCode".to_string(),
        description: None,
        actors: vec![],
        input: vec![
            Field {
                name: "code".to_string(),
                type_: TypeDef::Primitive {
                    name: "String".to_string(),
                },
                optional: false,
                annotations: vec![],
                span: span(),
            },
            Field {
                name: "codeVerified".to_string(),
                type_: TypeDef::Primitive {
                    name: "Boolean".to_string(),
                },
                optional: false,
                annotations: vec![],
                span: span(),
            },
        ],
        output: Output {
            success: TypeDef::Primitive {
                name: "Boolean".to_string(),
            },
            errors: vec![],
        },
        preconditions: vec![identifier("codeVerified")],
        postconditions: vec![PostconditionBlock {
            condition: PostConditionTarget::Success,
            predicates: vec![identifier("codeVerified")],
            span: span(),
        }],
        invariants: vec![],
        temporal: vec![],
        security: vec![],
        compliance: vec![],
        span: span(),
    };

    Domain {
        name: "OAuth".to_string(),
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
fn oauth_exchange_clauses_resolve_proven_from_trace() {
    let domain = oauth_exchange_domain();
    let trace = Trace {
        id: "trace-oauth-1".to_string(),
        behavior: "ExchangeAuthorizationCode".to_string(),
        start_time: "0".to_string(),
        end_time: "1".to_string(),
        events: vec![
            Event {
                state_change: Some(StateChange {
                    path: "codeVerified".to_string(),
                    old_value: serde_json::Value::Null,
                    new_value: serde_json::json!(true),
                }),
                check: None,
                events: vec![],
            },
            Event {
                state_change: None,
                check: Some(CheckEvent {
                    category: "postcondition".to_string(),
                    expression: "codeVerified".to_string(),
                    passed: true,
                }),
                events: vec![],
            },
        ],
    };

    let report = Orchestrator::default().run(RunInput {
        domain: &domain,
        file: "oauth.dsl",
        traces: std::slice::from_ref(&trace),
    });

    assert!(report
        .passes
        .diagnostics
        .iter()
        .all(|d| d.severity != domainspec_verify::diagnostics::Severity::Error));
    assert!(!report.clauses.is_empty());
    assert!(report
        .clauses
        .iter()
        .all(|c| c.status == ClauseStatus::Proven));
    assert_eq!(report.summary.totals.violated, 0);
    assert_eq!(report.summary.totals.not_proven, 0);
}
