//! Checks that the diff engine flags a field type change as breaking end to end,
//! through the public `diff_domains` entry point rather than its internal helpers.

use std::sync::Arc;

use domainspec_verify::ast::{Domain, EntityDecl, Field, Span, TypeDef};
use domainspec_verify::diff::{diff_domains, Severity};

fn span() -> Span {
    Span {
        file: Arc::from("user.dsl"),
        line: 1,
        column: 1,
        end_line: 1,
        end_column: 1,
        byte_offset: 0,
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

fn domain_with_user_email_type(type_name: &str) -> Domain {
    Domain {
        name: "Accounts".to_string(),
        version: "1.0.0".to_string(),
        imports: vec![],
        types: vec![],
        entities: vec![EntityDecl {
            name: "User".to_string(),
            fields: vec![field("email", type_name)],
            invariants: vec![],
            span: span(),
        }],
        behaviors: vec![],
        invariants: vec![],
        policies: vec![],
        views: vec![],
        scenarios: vec![],
        chaos: vec![],
        span: span(),
    }
}

#[test]
fn email_type_change_from_string_to_int_is_a_breaking_change() {
    let old = domain_with_user_email_type("String");
    let new = domain_with_user_email_type("Int");

    let diff = diff_domains(&old, &new);

    assert_eq!(diff.summary.breaking_changes, 1);
    assert!(!diff.summary.is_empty);

    assert_eq!(diff.entities.changed.len(), 1);
    let entity_change = &diff.entities.changed[0];
    assert_eq!(entity_change.name, "User");
    assert_eq!(entity_change.severity, Severity::Breaking);

    assert_eq!(entity_change.field_changes.len(), 1);
    let field_change = &entity_change.field_changes[0];
    assert_eq!(field_change.name, "email");
    assert_eq!(field_change.old_type.as_deref(), Some("String"));
    assert_eq!(field_change.new_type.as_deref(), Some("Int"));
    assert_eq!(field_change.severity, Severity::Breaking);
}
