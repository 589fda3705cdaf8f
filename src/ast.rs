//! Immutable tagged-variant tree produced by the (external) parser.
//!
//! Everything here is read-only input to the pipeline: a [`Domain`] and the tree beneath
//! it are never mutated once constructed (see module docs on ownership in `lib.rs`).
//! Every node carries a [`Span`]; synthetic nodes (introduced by a pass rather than the
//! parser) reuse their parent's span via [`Span::synthetic`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Source location of a single AST node.
///
/// `file` is reference-counted so thousands of nodes from the same document share one
/// allocation instead of cloning a path string per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub byte_offset: u32,
}

impl Span {
    /// A span for a node that has no source location of its own (an AST node
    /// synthesized by a pass). Reuses the parent's location, per the AST invariant that
    /// every node has a non-null span.
    pub fn synthetic(parent: &Span) -> Span {
        parent.clone()
    }

    #[cfg(test)]
    pub fn test(line: u32, column: u32) -> Span {
        Span {
            file: Arc::from("test.dsl"),
            line,
            column,
            end_line: line,
            end_column: column,
            byte_offset: 0,
        }
    }
}

/// Opaque identity assigned to every AST node at orchestrator start, for internal maps
/// only (clause resolution, trace-evidence aggregation). Never serialized into a
/// diagnostic or report — it is not part of the external AST contract in spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    #[serde(default)]
    pub entities: Vec<EntityDecl>,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub invariants: Vec<InvariantDecl>,
    #[serde(default)]
    pub policies: Vec<PolicyDecl>,
    #[serde(default)]
    pub views: Vec<ViewDecl>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioDecl>,
    #[serde(default)]
    pub chaos: Vec<ChaosDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub def: TypeDef,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub invariants: Vec<Expr>,
    pub span: Span,
}

/// One of the recursive type-definition variants (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeDef {
    Primitive { name: String },
    Reference { qualified_name: String },
    List { inner: Box<TypeDef> },
    Map { key: Box<TypeDef>, value: Box<TypeDef> },
    Optional { inner: Box<TypeDef> },
    Constrained { base: Box<TypeDef>, constraints: Vec<Expr> },
    Struct { fields: Vec<Field> },
    Union { variants: Vec<TypeDef> },
    Enum { variants: Vec<String> },
}

impl TypeDef {
    /// The declared name this type ultimately refers to, for resolver lookups —
    /// `Reference`/`Primitive` are transparent, everything else has no single name.
    pub fn reference_name(&self) -> Option<&str> {
        match self {
            TypeDef::Reference { qualified_name } => Some(qualified_name),
            TypeDef::Primitive { name } => Some(name),
            _ => None,
        }
    }

    pub fn struct_field_names(&self) -> Option<Vec<&str>> {
        match self {
            TypeDef::Struct { fields } => Some(fields.iter().map(|f| f.name.as_str()).collect()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: TypeDef,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub annotations: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub input: Vec<Field>,
    pub output: Output,
    #[serde(default)]
    pub preconditions: Vec<Expr>,
    #[serde(default)]
    pub postconditions: Vec<PostconditionBlock>,
    #[serde(default)]
    pub invariants: Vec<Expr>,
    #[serde(default)]
    pub temporal: Vec<Expr>,
    #[serde(default)]
    pub security: Vec<Expr>,
    #[serde(default)]
    pub compliance: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub success: TypeDef,
    #[serde(default)]
    pub errors: Vec<ErrorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSpec {
    pub name: String,
    pub span: Span,
}

/// A `condition` of `'success'`, `'any_error'`, or a named declared error (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name")]
pub enum PostConditionTarget {
    Success,
    AnyError,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostconditionBlock {
    pub condition: PostConditionTarget,
    #[serde(default)]
    pub predicates: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvariantDecl {
    #[serde(default)]
    pub name: Option<String>,
    /// Name of the entity/behavior this invariant is attached to, if any; `None` for a
    /// free-standing domain-level invariant.
    #[serde(default)]
    pub owner: Option<String>,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecl {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDecl {
    pub name: String,
    /// Bound variables introduced by `given`, scoped the same way quantifier/lambda
    /// variables are (spec §3 identifier-resolution precedence).
    #[serde(default)]
    pub given: Vec<Field>,
    #[serde(default)]
    pub steps: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosDecl {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub conditions: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Implies,
    /// Not part of a pure constraint language, but admitted here so the purity pass
    /// (spec §4.3, `E0414`) has a concrete node to flag — the grammar's full operator
    /// token set is left unspecified by spec §3, this fills that gap.
    Assign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantifierKind {
    ForAll,
    Exists,
}

/// The recursive heart of the AST (spec §3). Boxed children keep the enum's stack size
/// bounded regardless of nesting depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    Identifier {
        name: String,
        span: Span,
    },
    QualifiedName {
        parts: Vec<String>,
        span: Span,
    },
    StringLiteral {
        value: String,
        span: Span,
    },
    NumberLiteral {
        value: f64,
        is_float: bool,
        span: Span,
    },
    BooleanLiteral {
        value: bool,
        span: Span,
    },
    NullLiteral {
        span: Span,
    },
    DurationLiteral {
        value: f64,
        unit: String,
        span: Span,
    },
    RegexLiteral {
        pattern: String,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Member {
        object: Box<Expr>,
        property: String,
        span: Span,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Quantifier {
        #[serde(rename = "quantifierKind")]
        kind: QuantifierKind,
        var: String,
        collection: Box<Expr>,
        predicate: Box<Expr>,
        span: Span,
    },
    Conditional {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        span: Span,
    },
    Old {
        expr: Box<Expr>,
        span: Span,
    },
    Result {
        property: Option<String>,
        span: Span,
    },
    Input {
        property: String,
        span: Span,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
        span: Span,
    },
    ListExpr {
        elements: Vec<Expr>,
        span: Span,
    },
    MapExpr {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Identifier { span, .. }
            | Expr::QualifiedName { span, .. }
            | Expr::StringLiteral { span, .. }
            | Expr::NumberLiteral { span, .. }
            | Expr::BooleanLiteral { span, .. }
            | Expr::NullLiteral { span }
            | Expr::DurationLiteral { span, .. }
            | Expr::RegexLiteral { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Member { span, .. }
            | Expr::Index { span, .. }
            | Expr::Quantifier { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::Old { span, .. }
            | Expr::Result { span, .. }
            | Expr::Input { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::ListExpr { span, .. }
            | Expr::MapExpr { span, .. } => span,
        }
    }

    /// Immediate children, in left-to-right source order. The single traversal
    /// primitive every pass is built on (spec §9: "a single `walk(node, visitor)`
    /// ... is sufficient" rather than a visitor-interface-per-node).
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Identifier { .. }
            | Expr::QualifiedName { .. }
            | Expr::StringLiteral { .. }
            | Expr::NumberLiteral { .. }
            | Expr::BooleanLiteral { .. }
            | Expr::NullLiteral { .. }
            | Expr::DurationLiteral { .. }
            | Expr::RegexLiteral { .. } => vec![],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Unary { operand, .. } => vec![operand],
            Expr::Call { callee, args, .. } => {
                let mut out = vec![callee.as_ref()];
                out.extend(args.iter());
                out
            }
            Expr::Member { object, .. } => vec![object],
            Expr::Index { object, index, .. } => vec![object, index],
            Expr::Quantifier {
                collection,
                predicate,
                ..
            } => vec![collection, predicate],
            Expr::Conditional {
                cond,
                then_branch,
                else_branch,
                ..
            } => vec![cond, then_branch, else_branch],
            Expr::Old { expr, .. } => vec![expr],
            Expr::Result { .. } => vec![],
            Expr::Input { .. } => vec![],
            Expr::Lambda { body, .. } => vec![body],
            Expr::ListExpr { elements, .. } => elements.iter().collect(),
            Expr::MapExpr { entries, .. } => {
                entries.iter().flat_map(|(k, v)| [k, v]).collect()
            }
        }
    }
}

/// The "verb" of a call expression: for a bare `Identifier` callee this is its name;
/// for a `Member` callee (`obj.method(...)`) this is the method name. Used by the
/// purity pass's name-based closed-set checks (spec §4.3) and the encoder's builtin
/// dispatch (spec §4.6) — both are defined over the call's terminal name, not its full
/// callee expression.
pub fn callee_name(callee: &Expr) -> Option<&str> {
    match callee {
        Expr::Identifier { name, .. } => Some(name),
        Expr::Member { property, .. } => Some(property),
        _ => None,
    }
}

/// Pre-order, left-to-right walk over `expr` and every descendant, calling `f` on each
/// node. This is the generic recursive-descent primitive every pass uses instead of a
/// bespoke visitor trait per node kind.
pub fn walk_expr<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
    f(expr);
    for child in expr.children() {
        walk_expr(child, f);
    }
}

/// Flatten the top-level conjuncts of a boolean expression: `a and b and c` yields
/// `[a, b, c]`; anything else yields a single-element slice containing itself. Used by
/// the consistency pass (numeric bounds) and the SMT-LIB emitter (one tagged assertion
/// per top-level conjunct).
pub fn flatten_conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
            ..
        } => {
            let mut out = flatten_conjuncts(left);
            out.extend(flatten_conjuncts(right));
            out
        }
        other => vec![other],
    }
}

/// The clause-context kinds the purity/scope pass and resolver push/pop while
/// descending into a behavior's declarations (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Precondition,
    Postcondition,
    Invariant,
    Temporal,
    Security,
    Compliance,
    Scenario,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Expr {
        Expr::Identifier {
            name: name.to_string(),
            span: Span::test(1, 1),
        }
    }

    #[test]
    fn flatten_conjuncts_splits_nested_and() {
        let span = Span::test(1, 1);
        let expr = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(id("a")),
                right: Box::new(id("b")),
                span: span.clone(),
            }),
            right: Box::new(id("c")),
            span,
        };
        let parts = flatten_conjuncts(&expr);
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn walk_expr_visits_every_descendant() {
        let span = Span::test(1, 1);
        let expr = Expr::Call {
            callee: Box::new(id("f")),
            args: vec![id("a"), id("b")],
            span,
        };
        let mut seen = vec![];
        walk_expr(&expr, &mut |e| {
            if let Expr::Identifier { name, .. } = e {
                seen.push(name.clone());
            }
        });
        assert_eq!(seen, vec!["f", "a", "b"]);
    }
}
