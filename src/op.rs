//! The workflow operation graph.
//!
//! This module defines:
//! - [`WorkflowOp`]: the tagged sum of atomic query operations. Every
//!   non-source variant holds its source(s), so a tree of ops *is* the plan.
//! - Capability classification: sources, shape-preserving ops, and ops
//!   representable in the engine's pipeline DSL. The optimizer passes use
//!   these to decide what may fuse with or move past what.
//! - Smart constructors for chaining ops the way callers build plans.
//!
//! # Notes
//! * Ops are **immutable values**; every rewrite allocates new nodes. Sources
//!   are `Arc`-shared so merged plans can share a subtree cheaply.
//! * Equality is structural throughout; the algebra never observes pointer
//!   identity.
//! * References (`DocVar`) inside an op are always expressed relative to the
//!   output document of that op's source.

use crate::bson::Bson;
use crate::expr::{Expr, Grouped};
use crate::field::{BsonField, DocVar, SortKeys};
use crate::js::Js;
use crate::reshape::Reshape;
use crate::selector::Selector;
use std::fmt;
use std::sync::Arc;

/// A named collection in the target database.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Collection(pub String);

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The grouping key of a group op: a single expression or a reshape.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupBy {
    Expr(Expr),
    Shape(Reshape),
}

/// Bounds and ordering carried by a geo-near's find query.
#[derive(Clone, Debug, PartialEq)]
pub struct FindQuery {
    pub query: Selector,
    pub min: Option<Vec<(BsonField, Bson)>>,
    pub max: Option<Vec<(BsonField, Bson)>>,
    pub orderby: Option<SortKeys>,
}

/// Parameters of a geo-near op. Geo-near must be the first stage the engine
/// executes, which drives its special treatment in coalescing and merging.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoNear {
    pub near: (f64, f64),
    pub distance_field: BsonField,
    pub limit: Option<i64>,
    pub max_distance: Option<f64>,
    pub spherical: Option<bool>,
    pub query: Option<FindQuery>,
}

/// A node in the workflow operation graph.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowOp {
    /// An inline literal document.
    Pure(Bson),
    /// A named collection.
    Read(Collection),
    Match(Arc<WorkflowOp>, Selector),
    Project(Arc<WorkflowOp>, Reshape),
    Redact(Arc<WorkflowOp>, Expr),
    Limit(Arc<WorkflowOp>, i64),
    Skip(Arc<WorkflowOp>, i64),
    Unwind(Arc<WorkflowOp>, DocVar),
    Group(Arc<WorkflowOp>, Grouped, GroupBy),
    Sort(Arc<WorkflowOp>, SortKeys),
    GeoNear(Arc<WorkflowOp>, GeoNear),
    /// JS map; lowers to map/reduce.
    Map(Arc<WorkflowOp>, Js),
    /// JS flat-map; lowers to map/reduce.
    FlatMap(Arc<WorkflowOp>, Js),
    /// JS reduce; lowers to map/reduce.
    Reduce(Arc<WorkflowOp>, Js),
    /// Sequentially fold the outputs of several branches into one collection.
    /// Non-empty.
    FoldLeft(Vec<Arc<WorkflowOp>>),
    /// Combine independent branches.
    Join(Vec<Arc<WorkflowOp>>),
    // TODO(out-op): an output-collection op ($out) belongs here once its
    // forking semantics are settled -- single terminal output vs
    // tee-to-collection-then-continue. Neither is implemented yet.
}

impl WorkflowOp {
    // |--------------------|
    // | Smart constructors |
    // |--------------------|

    pub fn read(name: impl Into<String>) -> WorkflowOp {
        WorkflowOp::Read(Collection(name.into()))
    }

    #[must_use]
    pub fn pure(value: Bson) -> WorkflowOp {
        WorkflowOp::Pure(value)
    }

    #[must_use]
    pub fn matching(self, selector: Selector) -> WorkflowOp {
        WorkflowOp::Match(Arc::new(self), selector)
    }

    #[must_use]
    pub fn project(self, shape: Reshape) -> WorkflowOp {
        WorkflowOp::Project(Arc::new(self), shape)
    }

    #[must_use]
    pub fn redact(self, expr: Expr) -> WorkflowOp {
        WorkflowOp::Redact(Arc::new(self), expr)
    }

    #[must_use]
    pub fn limit(self, count: i64) -> WorkflowOp {
        WorkflowOp::Limit(Arc::new(self), count)
    }

    #[must_use]
    pub fn skip(self, count: i64) -> WorkflowOp {
        WorkflowOp::Skip(Arc::new(self), count)
    }

    #[must_use]
    pub fn unwind(self, field: DocVar) -> WorkflowOp {
        WorkflowOp::Unwind(Arc::new(self), field)
    }

    #[must_use]
    pub fn group(self, grouped: Grouped, by: GroupBy) -> WorkflowOp {
        WorkflowOp::Group(Arc::new(self), grouped, by)
    }

    #[must_use]
    pub fn sort(self, keys: SortKeys) -> WorkflowOp {
        assert!(!keys.is_empty(), "sort keys must be non-empty");
        WorkflowOp::Sort(Arc::new(self), keys)
    }

    #[must_use]
    pub fn geo_near(self, geo: GeoNear) -> WorkflowOp {
        WorkflowOp::GeoNear(Arc::new(self), geo)
    }

    #[must_use]
    pub fn map(self, fun: Js) -> WorkflowOp {
        WorkflowOp::Map(Arc::new(self), fun)
    }

    #[must_use]
    pub fn flat_map(self, fun: Js) -> WorkflowOp {
        WorkflowOp::FlatMap(Arc::new(self), fun)
    }

    #[must_use]
    pub fn reduce(self, fun: Js) -> WorkflowOp {
        WorkflowOp::Reduce(Arc::new(self), fun)
    }

    #[must_use]
    pub fn fold_left(branches: Vec<WorkflowOp>) -> WorkflowOp {
        assert!(!branches.is_empty(), "fold-left branches must be non-empty");
        WorkflowOp::FoldLeft(branches.into_iter().map(Arc::new).collect())
    }

    #[must_use]
    pub fn join(branches: Vec<WorkflowOp>) -> WorkflowOp {
        assert!(!branches.is_empty(), "join branches must be non-empty");
        WorkflowOp::Join(branches.into_iter().map(Arc::new).collect())
    }

    // |----------------|
    // | Classification |
    // |----------------|

    /// Ops with no source.
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self, WorkflowOp::Pure(_) | WorkflowOp::Read(_))
    }

    /// Ops that never alter the shape of the documents flowing through them.
    #[must_use]
    pub fn is_shape_preserving(&self) -> bool {
        matches!(
            self,
            WorkflowOp::Match(_, _) | WorkflowOp::Limit(_, _) | WorkflowOp::Skip(_, _)
        )
    }

    /// Ops representable in the engine's pipeline DSL. (Whether a particular
    /// match *stays* pipelineable also depends on its selector; see crushing.)
    #[must_use]
    pub fn is_pipeline_op(&self) -> bool {
        matches!(
            self,
            WorkflowOp::Match(_, _)
                | WorkflowOp::Limit(_, _)
                | WorkflowOp::Skip(_, _)
                | WorkflowOp::Project(_, _)
                | WorkflowOp::Redact(_, _)
                | WorkflowOp::Unwind(_, _)
                | WorkflowOp::Group(_, _, _)
                | WorkflowOp::Sort(_, _)
                | WorkflowOp::GeoNear(_, _)
        )
    }

    // |-----------------|
    // | Source plumbing |
    // |-----------------|

    /// The single source of this op, if it has exactly one.
    #[must_use]
    pub fn src(&self) -> Option<&WorkflowOp> {
        match self {
            WorkflowOp::Match(s, _)
            | WorkflowOp::Project(s, _)
            | WorkflowOp::Redact(s, _)
            | WorkflowOp::Limit(s, _)
            | WorkflowOp::Skip(s, _)
            | WorkflowOp::Unwind(s, _)
            | WorkflowOp::Group(s, _, _)
            | WorkflowOp::Sort(s, _)
            | WorkflowOp::GeoNear(s, _)
            | WorkflowOp::Map(s, _)
            | WorkflowOp::FlatMap(s, _)
            | WorkflowOp::Reduce(s, _) => Some(s),
            WorkflowOp::Pure(_)
            | WorkflowOp::Read(_)
            | WorkflowOp::FoldLeft(_)
            | WorkflowOp::Join(_) => None,
        }
    }

    /// Replace the single source of this op, leaving the payload untouched.
    /// Sources and composite ops pass through unchanged.
    #[must_use]
    pub fn reparent(&self, src: WorkflowOp) -> WorkflowOp {
        let src = Arc::new(src);
        match self {
            WorkflowOp::Match(_, sel) => WorkflowOp::Match(src, sel.clone()),
            WorkflowOp::Project(_, shape) => WorkflowOp::Project(src, shape.clone()),
            WorkflowOp::Redact(_, e) => WorkflowOp::Redact(src, e.clone()),
            WorkflowOp::Limit(_, n) => WorkflowOp::Limit(src, *n),
            WorkflowOp::Skip(_, n) => WorkflowOp::Skip(src, *n),
            WorkflowOp::Unwind(_, field) => WorkflowOp::Unwind(src, field.clone()),
            WorkflowOp::Group(_, grouped, by) => {
                WorkflowOp::Group(src, grouped.clone(), by.clone())
            }
            WorkflowOp::Sort(_, keys) => WorkflowOp::Sort(src, keys.clone()),
            WorkflowOp::GeoNear(_, geo) => WorkflowOp::GeoNear(src, geo.clone()),
            WorkflowOp::Map(_, f) => WorkflowOp::Map(src, f.clone()),
            WorkflowOp::FlatMap(_, f) => WorkflowOp::FlatMap(src, f.clone()),
            WorkflowOp::Reduce(_, f) => WorkflowOp::Reduce(src, f.clone()),
            other => other.clone(),
        }
    }

    /// Rebuild this op with every source mapped through `apply`.
    #[must_use]
    pub fn map_sources(&self, apply: &mut dyn FnMut(&WorkflowOp) -> WorkflowOp) -> WorkflowOp {
        match self {
            WorkflowOp::Pure(_) | WorkflowOp::Read(_) => self.clone(),
            WorkflowOp::FoldLeft(branches) => WorkflowOp::FoldLeft(
                branches.iter().map(|b| Arc::new(apply(b))).collect(),
            ),
            WorkflowOp::Join(branches) => {
                WorkflowOp::Join(branches.iter().map(|b| Arc::new(apply(b))).collect())
            }
            single => {
                let src = single.src().expect("single-source op");
                single.reparent(apply(src))
            }
        }
    }

    /// Every source of this op (empty for sources).
    #[must_use]
    pub fn sources(&self) -> Vec<&WorkflowOp> {
        match self {
            WorkflowOp::Pure(_) | WorkflowOp::Read(_) => vec![],
            WorkflowOp::FoldLeft(branches) | WorkflowOp::Join(branches) => {
                branches.iter().map(Arc::as_ref).collect()
            }
            single => vec![single.src().expect("single-source op")],
        }
    }

    /// Total number of ops in this tree, the node itself included.
    #[must_use]
    pub fn op_count(&self) -> usize {
        1 + self.sources().iter().map(|s| s.op_count()).sum::<usize>()
    }

    /// The contiguous run of project shapes above the nearest non-project
    /// ancestor, outermost first, together with that ancestor.
    #[must_use]
    pub fn collect_shapes(&self) -> (Vec<Reshape>, WorkflowOp) {
        match self {
            WorkflowOp::Project(src, shape) => {
                let (mut shapes, base) = src.collect_shapes();
                shapes.insert(0, shape.clone());
                (shapes, base)
            }
            other => (vec![], other.clone()),
        }
    }

    /// One-word label for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowOp::Pure(_) => "Pure",
            WorkflowOp::Read(_) => "Read",
            WorkflowOp::Match(_, _) => "Match",
            WorkflowOp::Project(_, _) => "Project",
            WorkflowOp::Redact(_, _) => "Redact",
            WorkflowOp::Limit(_, _) => "Limit",
            WorkflowOp::Skip(_, _) => "Skip",
            WorkflowOp::Unwind(_, _) => "Unwind",
            WorkflowOp::Group(_, _, _) => "Group",
            WorkflowOp::Sort(_, _) => "Sort",
            WorkflowOp::GeoNear(_, _) => "GeoNear",
            WorkflowOp::Map(_, _) => "Map",
            WorkflowOp::FlatMap(_, _) => "FlatMap",
            WorkflowOp::Reduce(_, _) => "Reduce",
            WorkflowOp::FoldLeft(_) => "FoldLeft",
            WorkflowOp::Join(_) => "Join",
        }
    }
}
