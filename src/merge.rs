//! The merger: combine two independently built op trees into one.
//!
//! `merge(a, b)` returns `((lbase, rbase), m)` such that a reference `v` from
//! `a` resolves as `lbase \ v` against `m`'s output, and a reference from `b`
//! as `rbase \ v`. The merged document carries both branches, conventionally
//! under the `lEft` / `rIght` labels (with a `value` wrapper when the combine
//! has to round-trip through map/reduce output documents).
//!
//! Dispatch is a first-match-wins case ladder; symmetric cases are written in
//! one orientation and the mirror delegates with swapped labels. The final
//! case -- fold two pre-projected branches into one collection with a
//! field-copying reducer -- accepts any pair of ops, so the function is total:
//! an unrecognized combination costs efficiency, never correctness.
//!
//! Every op in the returned tree is coalesced.

use crate::bson::Bson;
use crate::coalesce::coalesce;
use crate::expr::{Expr, Grouped};
use crate::field::{DocVar, flatten_mapping, unique_field};
use crate::js;
use crate::op::{GroupBy, WorkflowOp};
use crate::reshape::{Reshape, ShapeField};
use crate::rewrite::prefix_base;
use anyhow::Result;
use std::sync::Arc;

/// Label under which the left branch's data lands in a merged document. The
/// odd capitalization keeps the label out of the way of real field names.
pub const LEFT_LABEL: &str = "lEft";
/// Label for the right branch's data.
pub const RIGHT_LABEL: &str = "rIght";
/// Wrapper label used when a merge round-trips through map/reduce documents,
/// whose payload always sits under `value`.
pub const VALUE_LABEL: &str = "value";

fn left_var() -> DocVar {
    DocVar::named(LEFT_LABEL)
}

fn right_var() -> DocVar {
    DocVar::named(RIGHT_LABEL)
}

fn value_var() -> DocVar {
    DocVar::named(VALUE_LABEL)
}

/// The result of a merge: per-branch base offsets and the combined tree.
pub type Merged = ((DocVar, DocVar), WorkflowOp);

/// Merge two op trees; see the module docs for the contract.
///
/// # Errors
///
/// Only a malformed input tree (one that trips the reference rewriter's
/// aggregator invariant) can fail; every combination of well-formed ops
/// merges.
pub fn merge(a: &WorkflowOp, b: &WorkflowOp) -> Result<Merged> {
    if a == b {
        return Ok(((DocVar::root(), DocVar::root()), a.clone()));
    }
    let ((l, r), m) = merge_unequal(a, b)?;
    Ok(((l, r), coalesce(&m)))
}

/// Swap the operands and the returned labels.
fn delegate(a: &WorkflowOp, b: &WorkflowOp) -> Result<Merged> {
    let ((r, l), m) = merge(b, a)?;
    Ok(((l, r), m))
}

/// Rewrite `op`'s references under `base` and report the base its *output*
/// should be read at: shape definers (project, group) re-root their output,
/// everything else passes the base through.
fn rewritten(op: &WorkflowOp, base: &DocVar) -> Result<(WorkflowOp, DocVar)> {
    let out = prefix_base(op, base)?;
    let next = match op {
        WorkflowOp::Project(_, _) | WorkflowOp::Group(_, _, _) => DocVar::root(),
        _ => base.clone(),
    };
    Ok((out, next))
}

/// Shared body of the "merge with the pipeline op's source, then reparent the
/// rewritten op on top" cases.
fn merge_into_pipeline_src(l: &WorkflowOp, r: &WorkflowOp) -> Result<Merged> {
    let rsrc = r.src().expect("pipeline op has a source");
    let ((lb, rb), src) = merge(l, rsrc)?;
    let (r2, rb2) = rewritten(r, &rb)?;
    Ok(((lb, rb2), r2.reparent(src)))
}

fn merge_unequal(a: &WorkflowOp, b: &WorkflowOp) -> Result<Merged> {
    match (a, b) {
        // Two literals combine into one two-field literal.
        (WorkflowOp::Pure(x), WorkflowOp::Pure(y)) => Ok((
            (left_var(), right_var()),
            WorkflowOp::Pure(Bson::doc([
                (LEFT_LABEL.to_string(), x.clone()),
                (RIGHT_LABEL.to_string(), y.clone()),
            ])),
        )),

        // A literal rides along as a projected constant.
        (WorkflowOp::Pure(x), _) => Ok((
            (left_var(), right_var()),
            WorkflowOp::Project(
                Arc::new(b.clone()),
                Reshape::doc([
                    (
                        LEFT_LABEL.to_string(),
                        ShapeField::Expr(Expr::Literal(x.clone())),
                    ),
                    (
                        RIGHT_LABEL.to_string(),
                        ShapeField::Expr(Expr::Var(DocVar::root())),
                    ),
                ]),
            ),
        )),
        (_, WorkflowOp::Pure(_)) => delegate(a, b),

        // Geo-near must execute first: fold it into the other side's source
        // and stack the rest back on top.
        (WorkflowOp::GeoNear(_, _), r) if r.is_pipeline_op() => merge_into_pipeline_src(a, r),
        (l, WorkflowOp::GeoNear(_, _)) if l.is_pipeline_op() => delegate(a, b),

        // A shape-preserving op only filters rows, so it can float above the
        // merged stream with its references re-rooted.
        (l, r) if l.is_shape_preserving() && r.is_pipeline_op() => {
            let lsrc = l.src().expect("shape-preserving op has a source");
            let ((lb, rb), src) = merge(lsrc, r)?;
            let (l2, lb2) = rewritten(l, &lb)?;
            Ok(((lb2, rb), l2.reparent(src)))
        }

        // A project directly over the source being merged: keep the source's
        // whole document alongside the projection.
        (WorkflowOp::Project(psrc, shape), r) if r.is_source() && psrc.as_ref() == r => Ok((
            (left_var(), right_var()),
            WorkflowOp::Project(
                psrc.clone(),
                Reshape::doc([
                    (LEFT_LABEL.to_string(), ShapeField::Shape(shape.clone())),
                    (
                        RIGHT_LABEL.to_string(),
                        ShapeField::Expr(Expr::Var(DocVar::root())),
                    ),
                ]),
            ),
        )),
        (l, WorkflowOp::Project(psrc, _)) if l.is_source() && psrc.as_ref() == l => {
            delegate(a, b)
        }

        // Two groups over the same key: one group computing both aggregate
        // sets under fresh disjoint names, then a project restoring the
        // callers' names. Unequal keys fall through to the group/pipeline
        // case.
        (WorkflowOp::Group(ls, _, _), WorkflowOp::Group(rs, _, _)) => {
            let ((lb, rb), src) = merge(ls, rs)?;
            let (lg, lby) = group_payload(&prefix_base(a, &lb)?);
            let (rg, rby) = group_payload(&prefix_base(b, &rb)?);
            if lby != rby {
                return merge_group_with_pipeline(a, b);
            }
            let lkeys: Vec<String> = lg.keys().cloned().collect();
            let rkeys: Vec<String> = rg.keys().cloned().collect();
            let (lmap, rmap) = flatten_mapping(&lkeys, &rkeys);
            let mut combined = Grouped::new();
            for ((_, agg), (_, fresh)) in lg.iter().zip(&lmap) {
                combined.insert(fresh.clone(), agg.clone());
            }
            for ((_, agg), (_, fresh)) in rg.iter().zip(&rmap) {
                combined.insert(fresh.clone(), agg.clone());
            }
            let by_entry = match &lby {
                GroupBy::Expr(e) => ShapeField::Expr(e.clone()),
                GroupBy::Shape(s) => ShapeField::Shape(s.clone()),
            };
            let by = GroupBy::Shape(Reshape::arr([(0, by_entry.clone()), (1, by_entry)]));
            let group = WorkflowOp::Group(Arc::new(src), combined, by);
            let restore = |renames: &[(String, String)]| {
                Reshape::doc(renames.iter().map(|(orig, fresh)| {
                    (orig.clone(), ShapeField::Expr(Expr::field(fresh.clone())))
                }))
            };
            let shape = Reshape::doc([
                (LEFT_LABEL.to_string(), ShapeField::Shape(restore(&lmap))),
                (RIGHT_LABEL.to_string(), ShapeField::Shape(restore(&rmap))),
            ]);
            Ok((
                (left_var(), right_var()),
                WorkflowOp::Project(Arc::new(group), shape),
            ))
        }

        (WorkflowOp::Group(_, _, _), r) if r.is_pipeline_op() => {
            merge_group_with_pipeline(a, r)
        }
        (l, WorkflowOp::Group(_, _, _)) if l.is_pipeline_op() => delegate(a, b),

        // Two projects: one project with each shape under its label.
        (WorkflowOp::Project(ls, lshape), WorkflowOp::Project(rs, rshape)) => {
            let ((lb, rb), src) = merge(ls, rs)?;
            let lshape = rewrite_shape(lshape, &lb);
            let rshape = rewrite_shape(rshape, &rb);
            Ok((
                (left_var(), right_var()),
                WorkflowOp::Project(
                    Arc::new(src),
                    Reshape::doc([
                        (LEFT_LABEL.to_string(), ShapeField::Shape(lshape)),
                        (RIGHT_LABEL.to_string(), ShapeField::Shape(rshape)),
                    ]),
                ),
            ))
        }

        // Project against another pipeline op: the other side keeps its whole
        // output under the right label.
        (WorkflowOp::Project(ls, lshape), r) if r.is_pipeline_op() => {
            let ((lb, rb), src) = merge(ls, r)?;
            let lshape = rewrite_shape(lshape, &lb);
            Ok((
                (left_var(), right_var()),
                WorkflowOp::Project(
                    Arc::new(src),
                    Reshape::doc([
                        (LEFT_LABEL.to_string(), ShapeField::Shape(lshape)),
                        (RIGHT_LABEL.to_string(), ShapeField::Expr(Expr::Var(rb))),
                    ]),
                ),
            ))
        }
        (l, WorkflowOp::Project(_, _)) if l.is_pipeline_op() => delegate(a, b),

        // Two redacts stack on the merged source.
        (WorkflowOp::Redact(ls, le), WorkflowOp::Redact(rs, re)) => {
            let ((lb, rb), src) = merge(ls, rs)?;
            let le = le.rewrite_vars(&mut |v| lb.concat(v));
            let re = re.rewrite_vars(&mut |v| rb.concat(v));
            Ok((
                (lb.clone(), rb),
                WorkflowOp::Redact(Arc::new(WorkflowOp::Redact(Arc::new(src), le)), re),
            ))
        }

        // Unwinds: identical fields collapse into one, distinct fields stack.
        (WorkflowOp::Unwind(ls, lf), WorkflowOp::Unwind(rs, rf)) => {
            let ((lb, rb), src) = merge(ls, rs)?;
            let lf = lb.concat(lf);
            let rf = rb.concat(rf);
            let merged = if lf == rf {
                WorkflowOp::Unwind(Arc::new(src), lf)
            } else {
                WorkflowOp::Unwind(
                    Arc::new(WorkflowOp::Unwind(Arc::new(src), lf)),
                    rf,
                )
            };
            Ok(((lb, rb), merged))
        }

        // Unwind stays outside redact.
        (WorkflowOp::Unwind(ls, lf), WorkflowOp::Redact(_, _)) => {
            let ((lb, rb), src) = merge(ls, b)?;
            let lf = lb.concat(lf);
            Ok(((lb, rb), WorkflowOp::Unwind(Arc::new(src), lf)))
        }
        (WorkflowOp::Redact(_, _), WorkflowOp::Unwind(_, _)) => delegate(a, b),

        // A read against a map lowers to the fold-left combine straight away.
        (WorkflowOp::Read(_), WorkflowOp::Map(_, _)) => fold_left_merge(a, b),
        (WorkflowOp::Map(_, _), WorkflowOp::Read(_)) => delegate(a, b),

        // A map against a project: keep the map's document whole on the left.
        (WorkflowOp::Map(_, _), WorkflowOp::Project(ps, shape)) => {
            let ((lb, rb), src) = merge(a, ps)?;
            let shape = rewrite_shape(shape, &rb);
            Ok((
                (left_var(), right_var()),
                WorkflowOp::Project(
                    Arc::new(src),
                    Reshape::doc([
                        (LEFT_LABEL.to_string(), ShapeField::Expr(Expr::Var(lb))),
                        (RIGHT_LABEL.to_string(), ShapeField::Shape(shape)),
                    ]),
                ),
            ))
        }
        (WorkflowOp::Project(_, _), WorkflowOp::Map(_, _)) => delegate(a, b),

        // Anything against a pipeline op: absorb the pipeline op's source and
        // stack the rewritten op back on top.
        (l, r) if r.is_pipeline_op() => merge_into_pipeline_src(l, r),
        (l, _) if l.is_pipeline_op() => delegate(a, b),

        // Fallback: fold both branches into one collection.
        _ => fold_left_merge(a, b),
    }
}

fn group_payload(op: &WorkflowOp) -> (Grouped, GroupBy) {
    match op {
        WorkflowOp::Group(_, grouped, by) => (grouped.clone(), by.clone()),
        _ => unreachable!("rewrite preserves the group variant"),
    }
}

fn rewrite_shape(shape: &Reshape, base: &DocVar) -> Reshape {
    shape.map_exprs(&mut |e| e.rewrite_vars(&mut |v| base.concat(v)))
}

/// Group merged with an arbitrary pipeline op: push the other side's rows
/// into a scratch aggregate, then unwind them back out.
fn merge_group_with_pipeline(a: &WorkflowOp, b: &WorkflowOp) -> Result<Merged> {
    let gsrc = match a {
        WorkflowOp::Group(src, _, _) => src.as_ref(),
        _ => unreachable!("caller matched a group"),
    };
    let ((lb, rb), src) = merge(gsrc, b)?;
    let (mut grouped, by) = group_payload(&prefix_base(a, &lb)?);
    let existing: Vec<String> = grouped.keys().cloned().collect();
    let scratch = unique_field(&existing);
    grouped.insert(scratch.clone(), Expr::Push(Box::new(Expr::Var(rb))));
    let group = WorkflowOp::Group(Arc::new(src), grouped, by);
    let unwound = WorkflowOp::Unwind(Arc::new(group), DocVar::named(scratch.clone()));
    Ok(((DocVar::root(), DocVar::named(scratch)), unwound))
}

/// The always-safe combine: project each branch under `value.lEft` /
/// `value.rIght` and fold the two jobs into one collection, reducing with the
/// field-copy function so both halves land in a single document.
fn fold_left_merge(a: &WorkflowOp, b: &WorkflowOp) -> Result<Merged> {
    let wrap = |label: &str, op: &WorkflowOp| {
        WorkflowOp::Project(
            Arc::new(op.clone()),
            Reshape::doc([(
                VALUE_LABEL.to_string(),
                ShapeField::Shape(Reshape::doc([(
                    label.to_string(),
                    ShapeField::Expr(Expr::Var(DocVar::root())),
                )])),
            )]),
        )
    };
    let head = wrap(LEFT_LABEL, a);
    let tail = WorkflowOp::Reduce(Arc::new(wrap(RIGHT_LABEL, b)), js::copy_all_fields());
    Ok((
        (
            value_var().concat(&left_var()),
            value_var().concat(&right_var()),
        ),
        WorkflowOp::FoldLeft(vec![Arc::new(head), Arc::new(tail)]),
    ))
}
