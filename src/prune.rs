//! Dead-field elimination.
//!
//! Projects and groups *define* fields; everything downstream *uses* them. A
//! defined field that no downstream op reads (neither as a prefix nor as an
//! extension of any used reference) is deleted, recursively.
//!
//! Propagation of the used set to an op's sources depends on the variant:
//! shape definers (project, group) replace the set with their own references;
//! unwinds pass it through without crediting their field; JS-bearing ops are
//! opaque, so an empty set is sent down, which disables pruning until the next
//! project/group boundary. An empty set always means "prune nothing" -- in
//! particular at the root, where nothing outside the plan reads anything.

use crate::field::{BsonField, DocVar};
use crate::op::WorkflowOp;
use crate::rewrite::refs;
use std::collections::HashSet;

/// True when `defined` overlaps `used`: one is a prefix of the other, or the
/// use is the document root.
fn relates(defined: &BsonField, used: &DocVar) -> bool {
    match used.deref() {
        None => true,
        Some(path) => defined.starts_with(path) || path.starts_with(defined),
    }
}

/// The fields this op defines, as paths into its output.
fn defined_fields(op: &WorkflowOp) -> Vec<BsonField> {
    match op {
        WorkflowOp::Project(_, shape) => shape.get_all().into_iter().map(|(f, _)| f).collect(),
        WorkflowOp::Group(_, grouped, _) => grouped
            .keys()
            .map(|name| BsonField::name(name.clone()))
            .collect(),
        _ => vec![],
    }
}

/// Remove every field `op` defines that nothing in `used` reads, then recurse
/// into its sources with the appropriately propagated used set.
#[must_use]
pub fn prune(op: &WorkflowOp, used: &HashSet<DocVar>) -> WorkflowOp {
    let pruned = if used.is_empty() {
        op.clone()
    } else {
        let unused: Vec<BsonField> = defined_fields(op)
            .into_iter()
            .filter(|d| !used.iter().any(|u| relates(d, u)))
            .collect();
        if unused.is_empty() {
            op.clone()
        } else {
            match op {
                WorkflowOp::Project(src, shape) => {
                    WorkflowOp::Project(src.clone(), shape.delete_all(&unused))
                }
                WorkflowOp::Group(src, grouped, by) => {
                    let kept = grouped
                        .iter()
                        .filter(|(name, _)| {
                            !unused.iter().any(|f| *f == BsonField::name((*name).clone()))
                        })
                        .map(|(name, agg)| (name.clone(), agg.clone()))
                        .collect();
                    WorkflowOp::Group(src.clone(), kept, by.clone())
                }
                _ => op.clone(),
            }
        }
    };

    let child_used: HashSet<DocVar> = match &pruned {
        // An unwind cannot credit its own field as used.
        WorkflowOp::Unwind(_, _) => used.clone(),
        // Shape definers consume exactly their own references.
        WorkflowOp::Project(_, _) | WorkflowOp::Group(_, _, _) => {
            refs(&pruned).into_iter().collect()
        }
        // Opaque JS: assume everything below is read; pruning resumes at the
        // next project/group boundary.
        WorkflowOp::Map(_, _) | WorkflowOp::FlatMap(_, _) | WorkflowOp::Reduce(_, _) => {
            HashSet::new()
        }
        _ => {
            let mut all = used.clone();
            all.extend(refs(&pruned));
            all
        }
    };

    pruned.map_sources(&mut |src| prune(src, &child_used))
}

/// Total number of defined fields in the tree; used for plan diagnostics.
#[must_use]
pub fn defined_field_count(op: &WorkflowOp) -> usize {
    defined_fields(op).len()
        + op.sources()
            .iter()
            .map(|s| defined_field_count(s))
            .sum::<usize>()
}
