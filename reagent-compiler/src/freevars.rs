//! Free-variable discovery, run once per function body before any of its
//! own bytecode is emitted.
//!
//! Upvalue slots need to sit in a function's frame before any of its
//! ordinary block-scoped locals do (see `FuncState`), but upvalues are
//! only discovered by noticing a free reference while walking the body.
//! Doing that walk twice -- once here, free of charge, just to name the
//! free variables, and once for real during code generation -- keeps slot
//! allocation a single monotonically increasing counter instead of
//! needing two disjoint ranges.
//!
//! This is a conservative approximation, not full lexical shadowing: a
//! name that is `var`-declared *anywhere* in the function is treated as
//! bound everywhere in it, even at a reference point that lexically
//! precedes the declaration or sits in a sibling branch. The real
//! compile pass still resolves each reference against the live scope
//! stack, so the only thing this approximation can get wrong is failing
//! to reserve an upvalue slot for a name that, in a narrow shadowing
//! edge case, should have captured an outer binding instead of falling
//! back to a global lookup.

use arcstr::ArcStr;
use reagent_syntax::expr::{Expr, FieldDecl, Node};
use std::collections::HashSet;

pub fn free_vars(body: &Node, params: &[ArcStr]) -> Vec<ArcStr> {
    let mut bound: HashSet<ArcStr> = params.iter().cloned().collect();
    collect_bound(body, &mut bound);
    let mut seen = HashSet::new();
    let mut free = Vec::new();
    collect_free(body, &bound, &mut seen, &mut free);
    free
}

fn collect_bound(node: &Node, bound: &mut HashSet<ArcStr>) {
    match &node.kind {
        Expr::Var { name, value } => {
            bound.insert(name.clone());
            collect_bound(value, bound);
        }
        Expr::ForIn { var, iter, body } => {
            bound.insert(var.clone());
            collect_bound(iter, bound);
            collect_bound(body, bound);
        }
        Expr::TryCatch { body, catch_name, handler } => {
            bound.insert(catch_name.clone());
            collect_bound(body, bound);
            collect_bound(handler, bound);
        }
        Expr::Fn { params, body, .. } => {
            bound.extend(params.iter().cloned());
            collect_bound(body, bound);
        }
        Expr::ExistsThenElse { step, then_branch, else_branch } => {
            if let Some(b) = &step.binding {
                bound.insert(b.clone());
            }
            if let Some(g) = &step.guard {
                collect_bound(g, bound);
            }
            collect_bound(then_branch, bound);
            if let Some(e) = else_branch {
                collect_bound(e, bound);
            }
        }
        Expr::When { steps, body } => {
            for step in steps {
                if let Some(b) = &step.binding {
                    bound.insert(b.clone());
                }
                if let Some(g) = &step.guard {
                    collect_bound(g, bound);
                }
            }
            collect_bound(body, bound);
        }
        Expr::Schema { fields, .. } => {
            for f in fields {
                if let FieldDecl::Computed { body, .. } = f {
                    collect_bound(body, bound);
                }
            }
        }
        other => walk_children(other, &mut |n| collect_bound(n, bound)),
    }
}

fn collect_free(node: &Node, bound: &HashSet<ArcStr>, seen: &mut HashSet<ArcStr>, free: &mut Vec<ArcStr>) {
    if let Expr::Ident(name) = &node.kind {
        if !bound.contains(name) && seen.insert(name.clone()) {
            free.push(name.clone());
        }
    }
    match &node.kind {
        Expr::ExistsThenElse { step, then_branch, else_branch } => {
            if let Some(g) = &step.guard {
                collect_free(g, bound, seen, free);
            }
            collect_free(then_branch, bound, seen, free);
            if let Some(e) = else_branch {
                collect_free(e, bound, seen, free);
            }
        }
        Expr::When { steps, body } => {
            for step in steps {
                if let Some(g) = &step.guard {
                    collect_free(g, bound, seen, free);
                }
            }
            collect_free(body, bound, seen, free);
        }
        Expr::Schema { fields, .. } => {
            for f in fields {
                if let FieldDecl::Computed { body, .. } = f {
                    collect_free(body, bound, seen, free);
                }
                if let FieldDecl::Constant { value, .. } = f {
                    collect_free(value, bound, seen, free);
                }
                if let FieldDecl::Value { default: Some(d), .. } = f {
                    collect_free(d, bound, seen, free);
                }
            }
        }
        other => walk_children(other, &mut |n| collect_free(n, bound, seen, free)),
    }
}

/// Visits every direct child `Node` of an `Expr`, for the variants whose
/// children are plain subexpressions (the relational forms above have
/// enough extra structure -- steps, field decls -- that they're handled
/// directly by each caller instead).
fn walk_children(expr: &Expr, f: &mut impl FnMut(&Node)) {
    match expr {
        Expr::Nil | Expr::Int(_) | Expr::Real(_) | Expr::Ident(_) => {}
        Expr::Str(segs) => {
            for seg in segs {
                if let reagent_syntax::expr::StrSeg::Expr(n) = seg {
                    f(n);
                }
            }
        }
        Expr::ListLit(items) => items.iter().for_each(|n| f(n)),
        Expr::TreeLit(pairs) => pairs.iter().for_each(|(k, v)| {
            f(k);
            f(v);
        }),
        Expr::BinOp { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        Expr::And(a, b) | Expr::Or(a, b) => {
            f(a);
            f(b);
        }
        Expr::Not(a) => f(a),
        Expr::MethodCall { receiver, args, .. } => {
            f(receiver);
            args.iter().for_each(|n| f(n));
        }
        Expr::Call { callee, args } => {
            f(callee);
            args.iter().for_each(|n| f(n));
        }
        Expr::Block(stmts) => stmts.iter().for_each(|n| f(n)),
        Expr::Var { value, .. } | Expr::Def { value, .. } => f(value),
        Expr::Assign { target, value } => {
            f(target);
            f(value);
        }
        Expr::If { cond, then_branch, else_branch } => {
            f(cond);
            f(then_branch);
            if let Some(e) = else_branch {
                f(e);
            }
        }
        Expr::While { cond, body } | Expr::Until { cond, body } => {
            f(cond);
            f(body);
        }
        Expr::ForIn { iter, body, .. } => {
            f(iter);
            f(body);
        }
        Expr::Fn { body, .. } => f(body),
        Expr::TryCatch { body, handler, .. } => {
            f(body);
            f(handler);
        }
        Expr::Return(v) => {
            if let Some(n) = v {
                f(n);
            }
        }
        Expr::Insert { fields, .. } | Expr::Signal { fields, .. } => {
            fields.iter().for_each(|fi| f(&fi.value));
        }
        Expr::Update { target, fields } => {
            f(target);
            fields.iter().for_each(|fi| f(&fi.value));
        }
        Expr::Delete { target } => f(target),
        Expr::Schema { .. } | Expr::ExistsThenElse { .. } | Expr::When { .. } => {
            unreachable!("relational forms with extra structure are handled by their callers")
        }
    }
}
