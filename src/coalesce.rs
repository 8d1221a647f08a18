//! The coalescer: local, idempotent fusion of adjacent compatible ops.
//!
//! Each rule looks only at an op and its already-coalesced source, so the pass
//! is a single bottom-up sweep with local rewrites:
//!
//! 1. **Selector fusion** -- stacked matches conjoin; matches sink below
//!    sorts.
//! 2. **Paging arithmetic** -- stacked limits keep the minimum, stacked skips
//!    add, a limit over a skip widens and stays above.
//! 3. **Shape inlining** -- contiguous projects collapse into one by
//!    substituting inner definitions into outer references; groups absorb the
//!    project run beneath them the same way.
//! 4. **Geo-near discipline** -- geo-near must run first, so pipeline ops
//!    found beneath one are lifted above it, and of two stacked geo-nears only
//!    the outer survives.
//! 5. **JS fusion** -- adjacent map/flat-map ops compose into one function
//!    through the `[key, value]` pair convention.
//! 6. **Fold-left flattening** -- a fold-left heading a fold-left splices its
//!    branches.
//!
//! Coalescing never increases the op count, and applying it twice is a no-op.

use crate::expr::{Expr, Grouped};
use crate::field::BsonField;
use crate::js;
use crate::op::{GroupBy, WorkflowOp};
use crate::reshape::{Reshape, ShapeField};
use std::sync::Arc;

/// Coalesce `op` bottom-up.
#[must_use]
pub fn coalesce(op: &WorkflowOp) -> WorkflowOp {
    match op {
        WorkflowOp::Pure(_) | WorkflowOp::Read(_) => op.clone(),

        WorkflowOp::Match(src, sel) => match coalesce(src) {
            WorkflowOp::Match(s0, sel0) => {
                coalesce(&WorkflowOp::Match(s0, sel0.and(sel.clone())))
            }
            WorkflowOp::Sort(s0, keys) => WorkflowOp::Sort(
                Arc::new(coalesce(&WorkflowOp::Match(s0, sel.clone()))),
                keys,
            ),
            src => WorkflowOp::Match(Arc::new(src), sel.clone()),
        },

        WorkflowOp::Limit(src, n) => match coalesce(src) {
            WorkflowOp::Limit(s0, n0) => WorkflowOp::Limit(s0, (*n).min(n0)),
            WorkflowOp::Skip(s0, k) => coalesce(&WorkflowOp::Skip(
                Arc::new(WorkflowOp::Limit(s0, k + n)),
                k,
            )),
            src => WorkflowOp::Limit(Arc::new(src), *n),
        },

        WorkflowOp::Skip(src, k) => match coalesce(src) {
            WorkflowOp::Skip(s0, k0) => WorkflowOp::Skip(s0, k + k0),
            src => WorkflowOp::Skip(Arc::new(src), *k),
        },

        WorkflowOp::Project(src, shape) => {
            let candidate = WorkflowOp::Project(Arc::new(coalesce(src)), shape.clone());
            let (shapes, base) = candidate.collect_shapes();
            if shapes.len() > 1 {
                match inline_shapes(&shapes) {
                    Some(fused) => WorkflowOp::Project(Arc::new(base), fused),
                    None => candidate,
                }
            } else {
                candidate
            }
        }

        WorkflowOp::Redact(src, e) => WorkflowOp::Redact(Arc::new(coalesce(src)), e.clone()),

        WorkflowOp::Unwind(src, field) => {
            WorkflowOp::Unwind(Arc::new(coalesce(src)), field.clone())
        }

        WorkflowOp::Group(src, grouped, by) => {
            let src = coalesce(src);
            match inline_group_projects(&src, grouped, by) {
                Some((base, grouped, by)) => WorkflowOp::Group(Arc::new(base), grouped, by),
                None => WorkflowOp::Group(Arc::new(src), grouped.clone(), by.clone()),
            }
        }

        WorkflowOp::Sort(src, keys) => WorkflowOp::Sort(Arc::new(coalesce(src)), keys.clone()),

        WorkflowOp::GeoNear(src, geo) => match coalesce(src) {
            // Geo-near over geo-near: the outer one wins.
            WorkflowOp::GeoNear(s0, _) => coalesce(&WorkflowOp::GeoNear(s0, geo.clone())),
            // Geo-near must execute first; lift the pipeline op above it.
            src if src.is_pipeline_op() => {
                let inner = src.src().expect("pipeline op has a source").clone();
                let lowered = WorkflowOp::GeoNear(Arc::new(inner), geo.clone());
                coalesce(&src.reparent(lowered))
            }
            src => WorkflowOp::GeoNear(Arc::new(src), geo.clone()),
        },

        WorkflowOp::Map(src, f) => match coalesce(src) {
            WorkflowOp::Map(s0, f0) => WorkflowOp::Map(s0, js::fuse_maps(&f0, f)),
            WorkflowOp::FlatMap(s0, f0) => {
                WorkflowOp::FlatMap(s0, js::fuse_flat_map_then_map(&f0, f))
            }
            src => WorkflowOp::Map(Arc::new(src), f.clone()),
        },

        WorkflowOp::FlatMap(src, f) => match coalesce(src) {
            WorkflowOp::Map(s0, f0) => WorkflowOp::FlatMap(s0, js::fuse_maps(&f0, f)),
            WorkflowOp::FlatMap(s0, f0) => WorkflowOp::FlatMap(s0, js::fuse_flat_maps(&f0, f)),
            src => WorkflowOp::FlatMap(Arc::new(src), f.clone()),
        },

        WorkflowOp::Reduce(src, f) => WorkflowOp::Reduce(Arc::new(coalesce(src)), f.clone()),

        WorkflowOp::FoldLeft(branches) => {
            let mut coalesced: Vec<Arc<WorkflowOp>> =
                branches.iter().map(|b| Arc::new(coalesce(b))).collect();
            if let WorkflowOp::FoldLeft(head_branches) = coalesced[0].as_ref() {
                let mut spliced = head_branches.clone();
                spliced.extend(coalesced.drain(1..));
                WorkflowOp::FoldLeft(spliced)
            } else {
                WorkflowOp::FoldLeft(coalesced)
            }
        }

        WorkflowOp::Join(branches) => {
            WorkflowOp::Join(branches.iter().map(|b| Arc::new(coalesce(b))).collect())
        }
    }
}

/// Resolve a reference against the shape that produced the document.
///
/// Exact hits inline the defining expression; a path that extends a
/// var-valued definition re-roots its remainder under that var. Anything
/// else -- the document root, container hits, undefined fields -- refuses,
/// which makes the enclosing inline attempt give up.
pub(crate) fn resolve_var(v: &crate::field::DocVar, shape: &Reshape) -> Option<Expr> {
    let path = v.deref()?;
    match shape.get(path) {
        Some(ShapeField::Expr(e)) => return Some(e.clone()),
        Some(ShapeField::Shape(_)) => return None,
        None => {}
    }
    let steps = path.steps();
    for cut in (1..steps.len()).rev() {
        let prefix = BsonField::path(steps[..cut].to_vec());
        if let Some(ShapeField::Expr(Expr::Var(w))) = shape.get(&prefix) {
            let rest = BsonField::path(steps[cut..].to_vec());
            return Some(Expr::Var(w.concat(&crate::field::DocVar::field(rest))));
        }
    }
    None
}

/// Substitute `inner`'s definitions into `outer`'s references, producing the
/// single shape equivalent to applying `inner` then `outer`.
fn inline_project(outer: &Reshape, inner: &Reshape) -> Option<Reshape> {
    let pairs = outer
        .get_all()
        .into_iter()
        .map(|(path, expr)| {
            expr.substitute_vars(&mut |v| resolve_var(v, inner))
                .map(|e| (path, e))
        })
        .collect::<Option<Vec<_>>>()?;
    Some(Reshape::from_pairs(pairs))
}

/// Fuse a contiguous run of project shapes (outermost first) into one.
pub(crate) fn inline_shapes(shapes: &[Reshape]) -> Option<Reshape> {
    let mut iter = shapes.iter().rev();
    let mut acc = iter.next()?.clone();
    for outer in iter {
        acc = inline_project(outer, &acc)?;
    }
    Some(acc)
}

/// Absorb the contiguous project run beneath a group into the group's own
/// expressions. Returns the new base and rewritten payload, or `None` when
/// there is nothing to absorb or a reference refuses to inline.
fn inline_group_projects(
    src: &WorkflowOp,
    grouped: &Grouped,
    by: &GroupBy,
) -> Option<(WorkflowOp, Grouped, GroupBy)> {
    let (shapes, base) = src.collect_shapes();
    if shapes.is_empty() {
        return None;
    }
    let effective = inline_shapes(&shapes)?;
    let grouped = grouped
        .iter()
        .map(|(name, agg)| {
            agg.substitute_vars(&mut |v| resolve_var(v, &effective))
                .map(|agg| (name.clone(), agg))
        })
        .collect::<Option<Grouped>>()?;
    let by = match by {
        GroupBy::Expr(e) => {
            GroupBy::Expr(e.substitute_vars(&mut |v| resolve_var(v, &effective))?)
        }
        GroupBy::Shape(s) => {
            GroupBy::Shape(s.substitute_exprs(&mut |e| {
                e.substitute_vars(&mut |v| resolve_var(v, &effective))
            })?)
        }
    };
    Some((base, grouped, by))
}
