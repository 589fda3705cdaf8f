//! Expression encoder (spec §4.6, C9): maps an [`Expr`] to an SMT-LIB 2 term under a
//! [`TypingContext`], accumulating the `declare-sort`/`declare-const`/`declare-fun`
//! preamble a query needs as a side effect.

use std::collections::BTreeSet;

use crate::ast::{BinaryOp, Expr, QuantifierKind, Span, UnaryOp};
use crate::smt::{SmtSort, TypingContext};

#[derive(Debug, Clone, PartialEq)]
pub struct EncodingError {
    pub message: String,
    pub span: Span,
}

impl EncodingError {
    fn new(message: impl Into<String>, span: &Span) -> Self {
        EncodingError {
            message: message.into(),
            span: span.clone(),
        }
    }
}

/// Accumulates the SMT-LIB preamble a query needs: sort declarations, constant/function
/// declarations, and (deduplicated) uninterpreted constants standing in for enum
/// variants. Declarations are emitted in insertion order for determinism.
#[derive(Debug, Default)]
pub struct Declarations {
    sorts: Vec<String>,
    consts: Vec<(String, String)>,
    funs: Vec<(String, Vec<String>, String)>,
    seen: BTreeSet<String>,
}

impl Declarations {
    pub fn new() -> Self {
        Declarations::default()
    }

    fn declare_sort(&mut self, name: &str) {
        if self.seen.insert(format!("sort:{name}")) {
            self.sorts.push(name.to_string());
        }
    }

    fn declare_const(&mut self, name: &str, sort: &SmtSort) {
        if let SmtSort::Uninterpreted(s) = sort {
            self.declare_sort(s);
        }
        if self.seen.insert(format!("const:{name}")) {
            self.consts.push((name.to_string(), sort.smt_name()));
        }
    }

    fn declare_fun(&mut self, name: &str, args: &[SmtSort], ret: &SmtSort) {
        for sort in args.iter().chain(std::iter::once(ret)) {
            if let SmtSort::Uninterpreted(s) = sort {
                self.declare_sort(s);
            }
        }
        if self.seen.insert(format!("fun:{name}")) {
            self.funs.push((
                name.to_string(),
                args.iter().map(SmtSort::smt_name).collect(),
                ret.smt_name(),
            ));
        }
    }

    /// Renders the preamble as SMT-LIB text: one `declare-sort`/`declare-const`/
    /// `declare-fun` line per distinct declaration, sorts first so later lines can
    /// reference them.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for sort in &self.sorts {
            out.push_str(&format!("(declare-sort {sort} 0)\n"));
        }
        for (name, sort) in &self.consts {
            out.push_str(&format!("(declare-const {name} {sort})\n"));
        }
        for (name, args, ret) in &self.funs {
            out.push_str(&format!("(declare-fun {name} ({}) {ret})\n", args.join(" ")));
        }
        out
    }
}

/// Encodes one expression to an SMT-LIB term, registering any declarations it needs
/// along the way. `old_mode` renames every free identifier/input reference with a
/// `_pre` suffix (spec §4.6: `Old(e)` is encoded by variable renaming).
pub fn encode(
    expr: &Expr,
    ctx: &TypingContext,
    decls: &mut Declarations,
) -> Result<String, EncodingError> {
    encode_inner(expr, ctx, decls, false)
}

fn encode_inner(
    expr: &Expr,
    ctx: &TypingContext,
    decls: &mut Declarations,
    old_mode: bool,
) -> Result<String, EncodingError> {
    match expr {
        Expr::Identifier { name, span: _ } => {
            let symbol = if old_mode {
                format!("{name}_pre")
            } else {
                name.clone()
            };
            let sort = ctx
                .sort_of(name)
                .cloned()
                .unwrap_or(SmtSort::Uninterpreted("Universe".to_string()));
            decls.declare_const(&symbol, &sort);
            Ok(symbol)
        }
        Expr::QualifiedName { parts, span: _ } => {
            let symbol = parts.join("_");
            decls.declare_const(&symbol, &SmtSort::Uninterpreted("Universe".to_string()));
            Ok(symbol)
        }
        Expr::StringLiteral { value, .. } => Ok(format!("\"{}\"", value.replace('"', "\"\""))),
        Expr::NumberLiteral {
            value, is_float, ..
        } => Ok(format_numeral(*value, *is_float)),
        Expr::BooleanLiteral { value, .. } => Ok(value.to_string()),
        Expr::NullLiteral { span } => {
            decls.declare_const("null", &SmtSort::Uninterpreted("NullSort".to_string()));
            let _ = span;
            Ok("null".to_string())
        }
        Expr::DurationLiteral { value, unit, span } => {
            let seconds = duration_to_seconds(*value, unit)
                .ok_or_else(|| EncodingError::new(format!("unknown duration unit '{unit}'"), span))?;
            Ok(format_numeral(seconds, true))
        }
        Expr::RegexLiteral { pattern, .. } => Ok(format!("\"{}\"", pattern.replace('"', "\"\""))),
        Expr::Binary {
            op, left, right, span,
        } => {
            let l = encode_inner(left, ctx, decls, old_mode)?;
            let r = encode_inner(right, ctx, decls, old_mode)?;
            encode_binary(*op, &l, &r, span)
        }
        Expr::Unary { op, operand, span: _ } => {
            let o = encode_inner(operand, ctx, decls, old_mode)?;
            match op {
                UnaryOp::Not => Ok(format!("(not {o})")),
                UnaryOp::Neg => Ok(format!("(- {o})")),
            }
        }
        Expr::Call { callee, args, span } => encode_call(callee, args, span, ctx, decls, old_mode),
        Expr::Member { object, property, span } => {
            let obj = encode_inner(object, ctx, decls, old_mode)?;
            let fun_name = format!("field_{property}");
            decls.declare_fun(
                &fun_name,
                &[SmtSort::Uninterpreted("Universe".to_string())],
                &SmtSort::Uninterpreted("Universe".to_string()),
            );
            let _ = span;
            Ok(format!("({fun_name} {obj})"))
        }
        Expr::Index { object, index, .. } => {
            let obj = encode_inner(object, ctx, decls, old_mode)?;
            let idx = encode_inner(index, ctx, decls, old_mode)?;
            Ok(format!("(select {obj} {idx})"))
        }
        Expr::Quantifier {
            kind,
            var,
            collection,
            predicate,
            span,
        } => encode_quantifier(*kind, var, collection, predicate, span, ctx, decls, old_mode),
        Expr::Conditional {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            let c = encode_inner(cond, ctx, decls, old_mode)?;
            let t = encode_inner(then_branch, ctx, decls, old_mode)?;
            let e = encode_inner(else_branch, ctx, decls, old_mode)?;
            Ok(format!("(ite {c} {t} {e})"))
        }
        Expr::Old { expr: inner, .. } => encode_inner(inner, ctx, decls, true),
        Expr::Result { property, .. } => {
            let symbol = match property {
                Some(p) => format!("result_{p}"),
                None => "result".to_string(),
            };
            decls.declare_const(&symbol, &SmtSort::Uninterpreted("Universe".to_string()));
            Ok(symbol)
        }
        Expr::Input { property, .. } => {
            let sort = ctx
                .sort_of(property)
                .cloned()
                .unwrap_or(SmtSort::Uninterpreted("Universe".to_string()));
            decls.declare_const(property, &sort);
            Ok(property.clone())
        }
        Expr::Lambda { span, .. } => Err(EncodingError::new(
            "a bare lambda has no standalone SMT encoding outside a quantifier/call",
            span,
        )),
        Expr::ListExpr { elements, span } => {
            if elements.is_empty() {
                return Err(EncodingError::new("cannot encode an empty list literal", span));
            }
            Err(EncodingError::new(
                "list literals are not encoded to SMT; only membership/quantification over them is",
                span,
            ))
        }
        Expr::MapExpr { span, .. } => Err(EncodingError::new(
            "map literals have no direct SMT encoding",
            span,
        )),
    }
}

fn format_numeral(value: f64, is_float: bool) -> String {
    let magnitude = if is_float {
        let mut s = format!("{value:.}", );
        if !s.contains('.') {
            s.push_str(".0");
        }
        s
    } else {
        format!("{}", value as i64)
    };
    if value < 0.0 {
        let positive = magnitude.trim_start_matches('-').to_string();
        format!("(- {positive})")
    } else {
        magnitude
    }
}

fn duration_to_seconds(value: f64, unit: &str) -> Option<f64> {
    let multiplier = match unit {
        "ms" => 0.001,
        "s" => 1.0,
        "m" | "min" => 60.0,
        "h" => 3_600.0,
        "d" => 86_400.0,
        _ => return None,
    };
    Some(value * multiplier)
}

fn encode_binary(op: BinaryOp, l: &str, r: &str, span: &Span) -> Result<String, EncodingError> {
    let op_str = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "mod",
        BinaryOp::Eq => "=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Implies => "=>",
        BinaryOp::Neq => return Ok(format!("(not (= {l} {r}))")),
        BinaryOp::Assign => {
            return Err(EncodingError::new(
                "assignment is not a pure constraint expression and cannot be encoded to SMT",
                span,
            ))
        }
    };
    Ok(format!("({op_str} {l} {r})"))
}

fn encode_call(
    callee: &Expr,
    args: &[Expr],
    span: &Span,
    ctx: &TypingContext,
    decls: &mut Declarations,
    old_mode: bool,
) -> Result<String, EncodingError> {
    let name = crate::ast::callee_name(callee)
        .ok_or_else(|| EncodingError::new("call target is not a simple name or method", span))?
        .to_string();

    let mut encoded_args = Vec::with_capacity(args.len());
    for a in args {
        encoded_args.push(encode_inner(a, ctx, decls, old_mode)?);
    }

    // A `Member` callee also carries a receiver object that participates as the
    // implicit first argument of the encoded predicate (e.g. `grants.exists(code)`).
    let receiver = if let Expr::Member { object, .. } = callee {
        Some(encode_inner(object, ctx, decls, old_mode)?)
    } else {
        None
    };
    let mut all_args: Vec<String> = receiver.into_iter().collect();
    all_args.extend(encoded_args);

    match name.as_str() {
        "abs" if all_args.len() == 1 => {
            let a = &all_args[0];
            Ok(format!("(ite (>= {a} 0) {a} (- {a}))"))
        }
        "min" if all_args.len() == 2 => {
            Ok(format!("(ite (<= {} {}) {} {})", all_args[0], all_args[1], all_args[0], all_args[1]))
        }
        "max" if all_args.len() == 2 => {
            Ok(format!("(ite (>= {} {}) {} {})", all_args[0], all_args[1], all_args[0], all_args[1]))
        }
        "length" if all_args.len() == 1 => Ok(format!("(str.len {})", all_args[0])),
        "contains" if all_args.len() == 2 => {
            Ok(format!("(str.contains {} {})", all_args[0], all_args[1]))
        }
        "startsWith" if all_args.len() == 2 => {
            Ok(format!("(str.prefixof {} {})", all_args[1], all_args[0]))
        }
        "endsWith" if all_args.len() == 2 => {
            Ok(format!("(str.suffixof {} {})", all_args[1], all_args[0]))
        }
        "matches" if all_args.len() == 2 => {
            let fun_name = "str_matches";
            decls.declare_fun(fun_name, &[SmtSort::Str, SmtSort::Str], &SmtSort::Bool);
            Ok(format!("({fun_name} {} {})", all_args[0], all_args[1]))
        }
        _ => {
            // Any other call is encoded as an uninterpreted predicate named after the
            // call's terminal verb; the same name always gets the same arity so two
            // calls to the same behavior/method stay consistent (spec §4.6).
            let arg_sorts = vec![SmtSort::Uninterpreted("Universe".to_string()); all_args.len()];
            decls.declare_fun(&name, &arg_sorts, &SmtSort::Bool);
            Ok(format!("({name} {})", all_args.join(" ")))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_quantifier(
    kind: QuantifierKind,
    var: &str,
    collection: &Expr,
    predicate: &Expr,
    span: &Span,
    ctx: &TypingContext,
    decls: &mut Declarations,
    old_mode: bool,
) -> Result<String, EncodingError> {
    // A quantifier over a literal list is expanded into a finite conjunction/
    // disjunction, one substitution of `var` per element (spec §4.6).
    if let Expr::ListExpr { elements, .. } = collection {
        let mut parts = Vec::with_capacity(elements.len());
        for element in elements {
            let value = encode_inner(element, ctx, decls, old_mode)?;
            let mut inner_ctx = ctx.clone();
            inner_ctx.insert(var, SmtSort::Uninterpreted("Universe".to_string()));
            decls.declare_const(var, &SmtSort::Uninterpreted("Universe".to_string()));
            let body = encode_inner(predicate, &inner_ctx, decls, old_mode)?;
            parts.push(body.replace(var, &value));
        }
        let joiner = match kind {
            QuantifierKind::ForAll => "and",
            QuantifierKind::Exists => "or",
        };
        return Ok(format!("({joiner} {})", parts.join(" ")));
    }

    // Otherwise, fall back to a genuine SMT quantifier over a best-guess sort; the
    // solver may legitimately answer `unknown` here (spec §4.6, §9 open question).
    let elem_sort = SmtSort::Uninterpreted("Universe".to_string());
    let mut inner_ctx = ctx.clone();
    inner_ctx.insert(var, elem_sort.clone());
    let body = encode_inner(predicate, &inner_ctx, decls, old_mode)?;
    let binder = match kind {
        QuantifierKind::ForAll => "forall",
        QuantifierKind::Exists => "exists",
    };
    let _ = (collection, span);
    Ok(format!("({binder} (({var} {})) {body})", elem_sort.smt_name()))
}
