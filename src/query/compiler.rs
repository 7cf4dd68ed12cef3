//! Lowers [`Expr`] into closures (spec §4.7 step 3). Replaces the source's
//! compile-to-Python-`ast`-and-`eval` approach (`mdb/query/compiler.py`)
//! with direct closure composition, since Rust has no runtime `eval` (spec
//! §9 Design Notes). Every compiled expression has the same shape: given a
//! single-focus [`Context`], it returns the items it contributes — path
//! steps and "plain" expressions are compiled identically, matching
//! `mdb/query/tree.py::Path`'s own uniform `expand()` treatment of any
//! top-level expression (path or not).

use std::rc::Rc;

use super::ast::*;
use super::runtime::{expand_with, Context, QueryValue};
use super::Error;

pub type Compiled = Rc<dyn Fn(&Context) -> crate::Result<Vec<QueryValue>>>;

fn expr_label(expr: &Expr) -> &'static str {
    match expr {
        Expr::Steps(_) => "steps",
        Expr::AxisStep { .. } => "axis_step",
        Expr::Predicate(_) => "predicate",
        Expr::Filter(_) => "filter",
        Expr::ContextItem => "context_item",
        Expr::Sequence(_) => "sequence",
        Expr::FunctionCall { .. } => "function_call",
        Expr::Var(_) => "var",
        Expr::Integer(_) => "integer",
        Expr::Decimal(_) => "decimal",
        Expr::Str(_) => "str",
        Expr::And(..) => "and",
        Expr::Or(..) => "or",
        Expr::UnaryMinus(_) => "unary_minus",
        Expr::BinOp { .. } => "bin_op",
        Expr::CmpOp { .. } => "cmp_op",
        Expr::Range { .. } => "range",
        Expr::For { .. } => "for",
        Expr::Quantified { .. } => "quantified",
        Expr::If { .. } => "if",
    }
}

pub fn compile(expr: &Expr) -> crate::Result<Compiled> {
    tracing::trace!(expr = expr_label(expr), "compiler::compile");
    match expr {
        Expr::Steps(steps) => {
            let compiled: Vec<Compiled> = steps.iter().map(compile).collect::<crate::Result<_>>()?;
            Ok(Rc::new(move |ctx: &Context| {
                let mut items = vec![ctx.focus.clone()];
                for step in &compiled {
                    let step = step.clone();
                    items = expand_with(ctx.tree, &items, ctx.vars.clone(), &mut |c| step(c))?;
                }
                Ok(items)
            }))
        }

        Expr::AxisStep { axis, test } => compile_axis_step(*axis, test.clone()),

        Expr::Predicate(inner) => {
            let pred = compile(inner)?;
            Ok(Rc::new(move |ctx: &Context| {
                let result = pred(ctx)?;
                let matched = match &**inner {
                    // A bare integer predicate is a 1-based position test
                    // (`mdb/query/tree.py::predicate`'s `isinstance(pred, int)`
                    // special case), not a value to treat as the whole result.
                    Expr::Integer(n) => ctx.index as i64 == *n - 1,
                    // Otherwise effective boolean value: empty sequence is
                    // false, else the first item's own truthiness.
                    _ => result.first().is_some_and(QueryValue::truthy),
                };
                Ok(if matched { vec![ctx.focus.clone()] } else { Vec::new() })
            }))
        }

        Expr::Filter(inner) => {
            let inner = compile(inner)?;
            Ok(Rc::new(move |ctx: &Context| inner(ctx)))
        }

        Expr::ContextItem => Ok(Rc::new(|ctx: &Context| Ok(vec![ctx.focus.clone()]))),

        // A comma-separated sequence constructor: members flatten and
        // concatenate in order (XPath comma-operator semantics), e.g.
        // `(1, 2)` and `1, 2` both evaluate to the two-item sequence `1, 2`.
        Expr::Sequence(members) => {
            let compiled: Vec<Compiled> = members.iter().map(compile).collect::<crate::Result<_>>()?;
            Ok(Rc::new(move |ctx: &Context| {
                let mut out = Vec::new();
                for m in &compiled {
                    out.extend(m(ctx)?);
                }
                Ok(out)
            }))
        }

        Expr::FunctionCall { name, args } => compile_function_call(name.clone(), args),

        Expr::Var(name) => {
            let name = name.clone();
            Ok(Rc::new(move |ctx: &Context| Ok(vec![ctx.lookup(&name)?])))
        }

        Expr::Integer(n) => {
            let n = *n;
            Ok(Rc::new(move |_ctx: &Context| Ok(vec![QueryValue::Integer(n)])))
        }
        Expr::Decimal(n) => {
            let n = *n;
            Ok(Rc::new(move |_ctx: &Context| Ok(vec![QueryValue::Decimal(n)])))
        }
        Expr::Str(s) => {
            let s = s.clone();
            Ok(Rc::new(move |_ctx: &Context| Ok(vec![QueryValue::Str(s.clone())])))
        }

        Expr::And(l, r) => {
            let (l, r) = (compile(l)?, compile(r)?);
            Ok(Rc::new(move |ctx: &Context| {
                let lv = single(&l(ctx)?);
                let truthy = lv.as_ref().is_some_and(QueryValue::truthy);
                let value = if !truthy { false } else { single(&r(ctx)?).is_some_and(|v| v.truthy()) };
                Ok(vec![QueryValue::Boolean(value)])
            }))
        }
        Expr::Or(l, r) => {
            let (l, r) = (compile(l)?, compile(r)?);
            Ok(Rc::new(move |ctx: &Context| {
                let lv = single(&l(ctx)?);
                let truthy = lv.as_ref().is_some_and(QueryValue::truthy);
                let value = if truthy { true } else { single(&r(ctx)?).is_some_and(|v| v.truthy()) };
                Ok(vec![QueryValue::Boolean(value)])
            }))
        }

        Expr::UnaryMinus(inner) => {
            let inner = compile(inner)?;
            Ok(Rc::new(move |ctx: &Context| {
                let v = one(&inner(ctx)?)?;
                Ok(vec![match v {
                    QueryValue::Integer(n) => QueryValue::Integer(-n),
                    QueryValue::Decimal(n) => QueryValue::Decimal(-n),
                    _ => return Err(Error::NameError("unary '-' on non-numeric".to_string()).into()),
                }])
            }))
        }

        Expr::BinOp { op, left, right } => compile_binop(*op, left, right),
        Expr::CmpOp { op, left, right } => compile_cmpop(*op, left, right),

        Expr::Range { from, to } => {
            let (from, to) = (compile(from)?, compile(to)?);
            Ok(Rc::new(move |ctx: &Context| {
                let a = one(&from(ctx)?)?.as_f64()? as i64;
                let b = one(&to(ctx)?)?.as_f64()? as i64;
                Ok((a..=b).map(QueryValue::Integer).collect())
            }))
        }

        Expr::For { bindings, body } => compile_for(bindings, body),
        Expr::Quantified { quant, bindings, body } => compile_quantified(*quant, bindings, body),

        Expr::If { cond, then_branch, else_branch } => {
            let (cond, then_branch, else_branch) = (compile(cond)?, compile(then_branch)?, compile(else_branch)?);
            Ok(Rc::new(move |ctx: &Context| {
                let test = cond(ctx)?.first().is_some_and(QueryValue::truthy);
                if test { then_branch(ctx) } else { else_branch(ctx) }
            }))
        }
    }
}

fn single(items: &[QueryValue]) -> Option<QueryValue> {
    items.first().cloned()
}

fn one(items: &[QueryValue]) -> crate::Result<QueryValue> {
    single(items).ok_or_else(|| Error::NameError("expected exactly one value".to_string()).into())
}

fn compile_for(bindings: &[VarIn], body: &Expr) -> crate::Result<Compiled> {
    let compiled_bindings: Vec<(String, Compiled)> =
        bindings.iter().map(|b| Ok::<_, crate::Error>((b.name.clone(), compile(&b.expr)?))).collect::<crate::Result<_>>()?;
    let body = compile(body)?;
    Ok(Rc::new(move |ctx: &Context| {
        let mut frontier = vec![ctx.clone()];
        for (name, seq) in &compiled_bindings {
            let mut next = Vec::new();
            for c in &frontier {
                for v in seq(c)? {
                    next.push(c.with_var(name, v));
                }
            }
            frontier = next;
        }
        let mut out = Vec::new();
        for c in &frontier {
            out.extend(body(c)?);
        }
        Ok(out)
    }))
}

fn compile_quantified(quant: Quantifier, bindings: &[VarIn], body: &Expr) -> crate::Result<Compiled> {
    let compiled_bindings: Vec<(String, Compiled)> =
        bindings.iter().map(|b| Ok::<_, crate::Error>((b.name.clone(), compile(&b.expr)?))).collect::<crate::Result<_>>()?;
    let body = compile(body)?;
    Ok(Rc::new(move |ctx: &Context| {
        let mut frontier = vec![ctx.clone()];
        for (name, seq) in &compiled_bindings {
            let mut next = Vec::new();
            for c in &frontier {
                for v in seq(c)? {
                    next.push(c.with_var(name, v));
                }
            }
            frontier = next;
        }
        let mut results = Vec::with_capacity(frontier.len());
        for c in &frontier {
            results.push(body(c)?.iter().any(QueryValue::truthy));
        }
        let value = match quant {
            Quantifier::Some => results.iter().any(|b| *b),
            Quantifier::Every => results.iter().all(|b| *b),
        };
        Ok(vec![QueryValue::Boolean(value)])
    }))
}

fn compile_binop(op: BinOpKind, left: &Expr, right: &Expr) -> crate::Result<Compiled> {
    let (l, r) = (compile(left)?, compile(right)?);
    Ok(Rc::new(move |ctx: &Context| {
        let lv = l(ctx)?;
        let rv = r(ctx)?;
        match op {
            BinOpKind::Union => Ok(super::runtime::unique([lv, rv].concat())),
            BinOpKind::Intersect => {
                let rset = rv;
                Ok(lv.into_iter().filter(|x| rset.iter().any(|y| x == y)).collect())
            }
            BinOpKind::Except => {
                let rset = rv;
                Ok(lv.into_iter().filter(|x| !rset.iter().any(|y| x == y)).collect())
            }
            _ => {
                let a = one(&lv)?.as_f64()?;
                let b = one(&rv)?.as_f64()?;
                let result = match op {
                    BinOpKind::Add => a + b,
                    BinOpKind::Sub => a - b,
                    BinOpKind::Mul => a * b,
                    BinOpKind::Div => a / b,
                    BinOpKind::Mod => a % b,
                    BinOpKind::Union | BinOpKind::Intersect | BinOpKind::Except => unreachable!(),
                };
                Ok(vec![if result.fract() == 0.0 && matches!(op, BinOpKind::Add | BinOpKind::Sub | BinOpKind::Mul)
                    && matches!((&lv[0], &rv[0]), (QueryValue::Integer(_), QueryValue::Integer(_)))
                {
                    QueryValue::Integer(result as i64)
                } else {
                    QueryValue::Decimal(result)
                }])
            }
        }
    }))
}

fn compile_cmpop(op: CmpOpKind, left: &Expr, right: &Expr) -> crate::Result<Compiled> {
    let (l, r) = (compile(left)?, compile(right)?);
    Ok(Rc::new(move |ctx: &Context| {
        let lv = l(ctx)?;
        let rv = r(ctx)?;
        let a = one(&lv)?;
        let b = one(&rv)?;
        let value = match op {
            CmpOpKind::Is => a == b,
            CmpOpKind::Eq => a == b,
            CmpOpKind::Ne => a != b,
            CmpOpKind::Lt | CmpOpKind::Le | CmpOpKind::Gt | CmpOpKind::Ge => {
                let (x, y) = match (&a, &b) {
                    (QueryValue::Str(x), QueryValue::Str(y)) => {
                        return Ok(vec![QueryValue::Boolean(match op {
                            CmpOpKind::Lt => x < y,
                            CmpOpKind::Le => x <= y,
                            CmpOpKind::Gt => x > y,
                            CmpOpKind::Ge => x >= y,
                            _ => unreachable!(),
                        })])
                    }
                    _ => (a.as_f64()?, b.as_f64()?),
                };
                match op {
                    CmpOpKind::Lt => x < y,
                    CmpOpKind::Le => x <= y,
                    CmpOpKind::Gt => x > y,
                    CmpOpKind::Ge => x >= y,
                    _ => unreachable!(),
                }
            }
        };
        Ok(vec![QueryValue::Boolean(value)])
    }))
}

/// Axis steps (spec §4.7 step 3/4). Name tests whose first character is an
/// uppercase ASCII letter resolve via the type registry (kind test);
/// otherwise they match by name (spec §4.7 step 3), grounded on
/// `mdb/query.py::Query.test`.
fn compile_axis_step(axis: Axis, test: NodeTest) -> crate::Result<Compiled> {
    Ok(Rc::new(move |ctx: &Context| {
        let focus = match &ctx.focus {
            QueryValue::Node(k) => k.clone(),
            _ => return Ok(Vec::new()),
        };
        let tree = ctx.tree;
        let candidates: Vec<_> = match axis {
            Axis::SelfAxis => {
                if let NodeTest::Name(n) = &test {
                    if n == "root" {
                        vec![tree.root_of(&focus)]
                    } else {
                        vec![focus.clone()]
                    }
                } else {
                    vec![focus.clone()]
                }
            }
            Axis::Parent => tree.folder(&focus).into_iter().collect(),
            Axis::Child => tree.children(&focus),
            Axis::Attribute => {
                let name = match &test {
                    NodeTest::Name(n) => n.clone(),
                    NodeTest::Wildcard => return Ok(Vec::new()),
                };
                return Ok(tree.attribute(&focus, &name).into_iter().collect());
            }
            Axis::Ancestor => tree.ascend(&focus),
            Axis::AncestorOrSelf => {
                let mut v = vec![focus.clone()];
                v.extend(tree.ascend(&focus));
                v
            }
            Axis::Descendant => tree.descend(&focus),
            Axis::DescendantOrSelf => {
                let mut v = vec![focus.clone()];
                v.extend(tree.descend(&focus));
                v
            }
            Axis::FollowingSibling => tree.after(&focus),
            Axis::Following => tree
                .after(&focus)
                .into_iter()
                .flat_map(|s| {
                    let mut v = vec![s.clone()];
                    v.extend(tree.descend(&s));
                    v
                })
                .collect(),
            Axis::PreceedingSibling => tree.before(&focus),
            Axis::Preceeding => tree
                .before(&focus)
                .into_iter()
                .flat_map(|s| {
                    let mut v = vec![s.clone()];
                    v.extend(tree.descend(&s));
                    v
                })
                .collect(),
        };

        let matched = candidates.into_iter().filter(|k| node_test_matches(tree, k, &test));
        Ok(matched.map(QueryValue::Node).collect())
    }))
}

fn node_test_matches(tree: &super::runtime::Tree, key: &crate::codec::key::Key, test: &NodeTest) -> bool {
    match test {
        NodeTest::Wildcard => true,
        NodeTest::Name(name) => {
            if name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                tree.is_kind(key, name)
            } else {
                tree.name(key) == *name
            }
        }
    }
}

fn compile_function_call(name: String, args: &[Expr]) -> crate::Result<Compiled> {
    let compiled_args: Vec<Compiled> = args.iter().map(compile).collect::<crate::Result<_>>()?;
    Ok(Rc::new(move |ctx: &Context| {
        let mut evaluated = Vec::with_capacity(compiled_args.len());
        for a in &compiled_args {
            evaluated.push(a(ctx)?);
        }
        match name.as_str() {
            "root" => {
                let items = evaluated.into_iter().flatten().collect::<Vec<_>>();
                let items = if items.is_empty() { vec![ctx.focus.clone()] } else { items };
                let mut roots = Vec::new();
                for item in items {
                    if let QueryValue::Node(k) = item {
                        roots.push(QueryValue::Node(ctx.tree.root_of(&k)));
                    }
                }
                Ok(super::runtime::unique(roots))
            }
            "position" => Ok(vec![QueryValue::Integer(ctx.index as i64 + 1)]),
            "last" => Ok(vec![QueryValue::Integer(ctx.collection.len() as i64)]),
            "count" => {
                let n = evaluated.first().map(|v| v.len()).unwrap_or(0);
                Ok(vec![QueryValue::Integer(n as i64)])
            }
            "name" => match &ctx.focus {
                QueryValue::Node(k) => Ok(vec![QueryValue::Str(ctx.tree.name(k))]),
                _ => Ok(Vec::new()),
            },
            "not" => {
                let v = evaluated.first().is_some_and(|v| v.iter().any(QueryValue::truthy));
                Ok(vec![QueryValue::Boolean(!v)])
            }
            other => Err(Error::NameError(other.to_string()).into()),
        }
    }))
}
