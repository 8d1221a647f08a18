//! The executable task algebra.
//!
//! [`WorkflowTask`] is what the planner hands to the execution layer: a small
//! tree of concrete engine invocations -- reads, pure values, pipeline runs,
//! map/reduce jobs, fold-left chains, and joins. Nothing here is optimized
//! further; crushing has already decided the shape.

use crate::bson::Bson;
use crate::expr::{Expr, Grouped};
use crate::field::{DocVar, SortKeys};
use crate::js::Js;
use crate::op::{Collection, GeoNear, GroupBy};
use crate::reshape::Reshape;
use crate::selector::Selector;
use serde::Serialize;

/// One stage of an engine pipeline invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineStage {
    Match(Selector),
    Project(Reshape),
    Redact(Expr),
    Limit(i64),
    Skip(i64),
    Unwind(DocVar),
    Group(Grouped, GroupBy),
    Sort(SortKeys),
    GeoNear(GeoNear),
}

impl PipelineStage {
    /// The engine's name for this stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Match(_) => "$match",
            PipelineStage::Project(_) => "$project",
            PipelineStage::Redact(_) => "$redact",
            PipelineStage::Limit(_) => "$limit",
            PipelineStage::Skip(_) => "$skip",
            PipelineStage::Unwind(_) => "$unwind",
            PipelineStage::Group(_, _) => "$group",
            PipelineStage::Sort(_) => "$sort",
            PipelineStage::GeoNear(_) => "$geoNear",
        }
    }

    /// Render to the engine's stage-document form.
    #[must_use]
    pub fn to_bson(&self) -> Bson {
        let body = match self {
            PipelineStage::Match(sel) => sel.to_bson(),
            PipelineStage::Project(shape) => shape.to_bson(),
            PipelineStage::Redact(e) => e.to_bson(),
            PipelineStage::Limit(n) | PipelineStage::Skip(n) => Bson::Int64(*n),
            PipelineStage::Unwind(field) => Bson::Text(field.to_string()),
            PipelineStage::Group(grouped, by) => {
                let mut entries: Vec<(String, Bson)> = grouped
                    .iter()
                    .map(|(name, agg)| (name.clone(), agg.to_bson()))
                    .collect();
                let id = match by {
                    GroupBy::Expr(e) => e.to_bson(),
                    GroupBy::Shape(s) => s.to_bson(),
                };
                entries.push(("_id".to_string(), id));
                Bson::doc(entries)
            }
            PipelineStage::Sort(keys) => Bson::doc(
                keys.iter()
                    .map(|(field, dir)| (field.as_text(), Bson::Int64(dir.as_int()))),
            ),
            PipelineStage::GeoNear(geo) => {
                let mut entries = vec![
                    (
                        "near".to_string(),
                        Bson::Arr(vec![Bson::from(geo.near.0), Bson::from(geo.near.1)]),
                    ),
                    (
                        "distanceField".to_string(),
                        Bson::Text(geo.distance_field.as_text()),
                    ),
                ];
                if let Some(limit) = geo.limit {
                    entries.push(("limit".to_string(), Bson::Int64(limit)));
                }
                if let Some(max) = geo.max_distance {
                    entries.push(("maxDistance".to_string(), Bson::from(max)));
                }
                if let Some(spherical) = geo.spherical {
                    entries.push(("spherical".to_string(), Bson::Bool(spherical)));
                }
                if let Some(fq) = &geo.query {
                    entries.push(("query".to_string(), fq.query.to_bson()));
                }
                Bson::doc(entries)
            }
        };
        Bson::doc([(self.name().to_string(), body)])
    }
}

/// What a map/reduce job does with its output collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OutputAction {
    /// Replace the output collection.
    Replace,
    /// Merge documents, newer wins.
    Merge,
    /// Reduce incoming documents into existing ones.
    Reduce,
}

/// The parameters of one map/reduce job.
#[derive(Clone, Debug, PartialEq)]
pub struct MapReduce {
    pub map: Js,
    pub reduce: Js,
    /// Pre-filter applied before the map.
    pub selection: Option<Selector>,
    /// Input ordering applied before the map.
    pub input_sort: Option<SortKeys>,
    /// Input cap applied before the map.
    pub limit: Option<i64>,
    /// Optional finalize step applied per reduced key.
    pub finalizer: Option<Js>,
    pub action: OutputAction,
}

impl MapReduce {
    /// A job with just a map and reduce; everything else defaulted.
    #[must_use]
    pub fn new(map: Js, reduce: Js) -> MapReduce {
        MapReduce {
            map,
            reduce,
            selection: None,
            input_sort: None,
            limit: None,
            finalizer: None,
            action: OutputAction::Replace,
        }
    }
}

/// An executable task tree.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowTask {
    /// An inline value needing no engine call.
    Pure(Bson),
    /// Read a collection.
    Read(Collection),
    /// Run pipeline stages over the upstream task's output.
    Pipeline(Box<WorkflowTask>, Vec<PipelineStage>),
    /// Run a map/reduce job over the upstream task's output.
    MapReduce(Box<WorkflowTask>, MapReduce),
    /// Run the head, then fold each tail job into the same collection.
    FoldLeft(Box<WorkflowTask>, Vec<WorkflowTask>),
    /// Combine independent tasks.
    Join(Vec<WorkflowTask>),
}

impl WorkflowTask {
    /// One-word label for diagnostics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowTask::Pure(_) => "PureTask",
            WorkflowTask::Read(_) => "ReadTask",
            WorkflowTask::Pipeline(_, _) => "PipelineTask",
            WorkflowTask::MapReduce(_, _) => "MapReduceTask",
            WorkflowTask::FoldLeft(_, _) => "FoldLeftTask",
            WorkflowTask::Join(_) => "JoinTask",
        }
    }
}
