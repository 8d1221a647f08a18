//! The reference rewriter.
//!
//! [`rewrite_refs`] rebuilds a single op with every document reference in its
//! payload mapped through a caller-supplied function. Rewriting is strictly
//! local: the op's sources are carried over untouched, and the op's variant is
//! preserved. Field names that act as references (selector fields, sort keys,
//! the geo-near distance field, find-query bounds) are rewritten by lifting
//! them to a [`DocVar`], applying the mapping, and dereferencing back.
//!
//! [`refs`] is the same traversal run with the identity mapping and a
//! collection sink.

use crate::expr::Grouped;
use crate::field::{BsonField, DocVar, SortKeys};
use crate::op::{FindQuery, GeoNear, GroupBy, WorkflowOp};
use anyhow::{Result, bail};

/// Rewrite a field name used as a reference: lift to a var, apply, deref.
/// A mapping that lands on the document root leaves the name unchanged.
fn apply_field(field: &BsonField, apply: &mut dyn FnMut(&DocVar) -> DocVar) -> BsonField {
    apply(&DocVar::field(field.clone()))
        .deref()
        .cloned()
        .unwrap_or_else(|| field.clone())
}

fn apply_sort(keys: &SortKeys, apply: &mut dyn FnMut(&DocVar) -> DocVar) -> SortKeys {
    keys.iter()
        .map(|(field, dir)| (apply_field(field, apply), *dir))
        .collect()
}

fn apply_find_query(fq: &FindQuery, apply: &mut dyn FnMut(&DocVar) -> DocVar) -> FindQuery {
    let bounds = |bounds: &Option<Vec<(BsonField, crate::bson::Bson)>>,
                  apply: &mut dyn FnMut(&DocVar) -> DocVar| {
        bounds.as_ref().map(|entries| {
            entries
                .iter()
                .map(|(field, value)| (apply_field(field, apply), value.clone()))
                .collect()
        })
    };
    FindQuery {
        query: fq.query.map_fields(&mut |f| apply_field(f, apply)),
        min: bounds(&fq.min, apply),
        max: bounds(&fq.max, apply),
        orderby: fq.orderby.as_ref().map(|keys| apply_sort(keys, apply)),
    }
}

/// Rebuild `op` with every reference in its payload mapped through `apply`.
///
/// Sources are untouched and the variant is preserved. JS-bearing payloads are
/// opaque and pass through verbatim.
///
/// # Errors
///
/// Fails if rewriting turns a group aggregator into a non-aggregator
/// expression -- a malformed tree no correct caller can produce.
pub fn rewrite_refs(
    op: &WorkflowOp,
    apply: &mut dyn FnMut(&DocVar) -> DocVar,
) -> Result<WorkflowOp> {
    Ok(match op {
        WorkflowOp::Pure(_)
        | WorkflowOp::Read(_)
        | WorkflowOp::Limit(_, _)
        | WorkflowOp::Skip(_, _)
        | WorkflowOp::Map(_, _)
        | WorkflowOp::FlatMap(_, _)
        | WorkflowOp::Reduce(_, _)
        | WorkflowOp::FoldLeft(_)
        | WorkflowOp::Join(_) => op.clone(),
        WorkflowOp::Match(src, sel) => {
            WorkflowOp::Match(src.clone(), sel.map_fields(&mut |f| apply_field(f, apply)))
        }
        WorkflowOp::Project(src, shape) => WorkflowOp::Project(
            src.clone(),
            shape.map_exprs(&mut |e| e.rewrite_vars(apply)),
        ),
        WorkflowOp::Redact(src, e) => WorkflowOp::Redact(src.clone(), e.rewrite_vars(apply)),
        WorkflowOp::Unwind(src, field) => WorkflowOp::Unwind(src.clone(), apply(field)),
        WorkflowOp::Group(src, grouped, by) => {
            let mut rewritten: Grouped = Grouped::new();
            for (name, agg) in grouped {
                let agg = agg.rewrite_vars(apply);
                if !agg.is_aggregator() {
                    bail!("reference rewrite changed an aggregator variant in {op:?}");
                }
                rewritten.insert(name.clone(), agg);
            }
            let by = match by {
                GroupBy::Expr(e) => GroupBy::Expr(e.rewrite_vars(apply)),
                GroupBy::Shape(s) => GroupBy::Shape(s.map_exprs(&mut |e| e.rewrite_vars(apply))),
            };
            WorkflowOp::Group(src.clone(), rewritten, by)
        }
        WorkflowOp::Sort(src, keys) => WorkflowOp::Sort(src.clone(), apply_sort(keys, apply)),
        WorkflowOp::GeoNear(src, geo) => WorkflowOp::GeoNear(
            src.clone(),
            GeoNear {
                distance_field: apply_field(&geo.distance_field, apply),
                query: geo.query.as_ref().map(|fq| apply_find_query(fq, apply)),
                ..geo.clone()
            },
        ),
    })
}

/// Rewrite every reference in `op` to live under `base`.
///
/// This is the substitution the merger hands out: resolving a reference `v`
/// from one of the merged branches means reading `base \ v` in the merged
/// output.
pub fn prefix_base(op: &WorkflowOp, base: &DocVar) -> Result<WorkflowOp> {
    rewrite_refs(op, &mut |v| base.concat(v))
}

/// Every reference in `op`'s payload, in traversal order.
///
/// Implemented as the rewriter with the identity mapping and a collection
/// sink.
#[must_use]
pub fn refs(op: &WorkflowOp) -> Vec<DocVar> {
    let mut seen = Vec::new();
    let _ = rewrite_refs(op, &mut |v| {
        seen.push(v.clone());
        v.clone()
    })
    .expect("identity rewrite cannot change variants");
    seen
}
