//! # Docflow
//!
//! A **workflow planner** for compiling relational query algebra onto a
//! document database's native execution surface. Docflow receives a logical
//! tree of query operations and emits an executable workflow: pipeline
//! invocations and map/reduce jobs, sequenced so the engine can run them
//! directly.
//!
//! ## Key Features
//!
//! - **Workflow op algebra** - immutable [`WorkflowOp`] trees with smart
//!   constructors for chaining reads, filters, projections, groups, sorts,
//!   and JS map/flat-map/reduce stages
//! - **Coalescing** - local, idempotent fusion of adjacent compatible ops
//!   (stacked matches, paging arithmetic, project inlining, JS composition)
//! - **Merging** - a total binary combinator that joins two independently
//!   built trees and reports where each branch's data lives in the result
//! - **Dead-field pruning** - projection and group entries nothing reads are
//!   removed
//! - **Crushing** - lowering to the concrete task algebra
//!   ([`WorkflowTask`]): pipelines, map/reduce jobs, fold-left chains, joins
//! - **Plan explanation** - a renderable report of the emitted tasks and the
//!   normalization decisions behind them
//!
//! ## Quick Start
//!
//! ```
//! use docflow::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! // Filter, order, and cap a collection read.
//! let plan = WorkflowOp::read("zips")
//!     .matching(Selector::field(
//!         BsonField::name("pop"),
//!         Condition::Gte(Bson::Int64(10_000)),
//!     ))
//!     .sort(vec![(BsonField::name("pop"), SortDir::Ascending)])
//!     .limit(10);
//!
//! // Normalize and lower to executable tasks.
//! let flow = workflow(&plan)?;
//! println!("{}", flow.explain());
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### `WorkflowOp`
//!
//! The logical plan: a DAG of tagged ops, each holding its source(s). Ops are
//! immutable values; every rewrite allocates a new tree.
//!
//! ### Normalization
//!
//! [`finish`] runs [`coalesce`] (local fusion) and then [`prune`] (dead-field
//! elimination). Both passes are idempotent, and normalization never turns a
//! valid plan into an invalid one -- an op combination the rules do not
//! recognize is simply left alone.
//!
//! ### Merging
//!
//! [`merge`] combines two trees into one and returns, alongside the merged
//! tree, a base reference per branch: rewriting a branch's references under
//! its base resolves them against the merged output. Expressions that span
//! two derived relations (joins, correlated subqueries) are planned this way.
//!
//! ### Crushing
//!
//! [`crush`] maps the optimized tree onto the engine's execution surface.
//! Pipeline-expressible runs become a single pipeline task; JS ops become
//! map/reduce jobs, absorbing adjacent match/sort/limit ops into job
//! parameters where the engine supports it.
//!
//! ## Scope
//!
//! Docflow is a pure value-level transformation: no I/O, no connection
//! handling, no execution. Parsing SQL and running the emitted tasks belong
//! to the surrounding system.

pub mod bson;
pub mod coalesce;
pub mod crush;
pub mod expr;
pub mod field;
pub mod js;
pub mod merge;
pub mod op;
pub mod prune;
pub mod reshape;
pub mod rewrite;
pub mod selector;
pub mod task;
pub mod workflow;

pub use bson::Bson;
pub use coalesce::coalesce;
pub use crush::crush;
pub use expr::{Expr, Grouped};
pub use field::{BsonField, DocVar, FieldStep, SortDir, SortKeys, flatten_mapping, unique_field};
pub use js::Js;
pub use merge::{LEFT_LABEL, Merged, RIGHT_LABEL, VALUE_LABEL, merge};
pub use op::{Collection, FindQuery, GeoNear, GroupBy, WorkflowOp};
pub use prune::prune;
pub use reshape::{Reshape, ShapeField};
pub use rewrite::{prefix_base, refs, rewrite_refs};
pub use selector::{Condition, Selector};
pub use task::{MapReduce, OutputAction, PipelineStage, WorkflowTask};
pub use workflow::{
    ExplainStep, PlanDecision, Workflow, WorkflowExplanation, finish, workflow,
};
