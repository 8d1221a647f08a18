//! The crusher: lower an optimized op tree to executable tasks.
//!
//! Lowering is variant-directed:
//! - sources become [`WorkflowTask::Pure`] / [`WorkflowTask::Read`];
//! - runs of pipeline-expressible ops collect into one
//!   [`WorkflowTask::Pipeline`] (a match whose selector carries a JS `where`
//!   cannot ride in a pipeline and becomes a filtering map/reduce instead);
//! - JS ops become [`WorkflowTask::MapReduce`] jobs, peeling any trailing
//!   match/sort/limit prefix of their source into the job's own
//!   selection/sort/limit parameters, and folding a trailing map into an
//!   existing job's finalize slot when possible;
//! - fold-lefts force every tail job into reduce-mode output.

use crate::field::SortKeys;
use crate::js;
use crate::op::WorkflowOp;
use crate::selector::Selector;
use crate::task::{MapReduce, OutputAction, PipelineStage, WorkflowTask};
use anyhow::{Result, bail};

/// Lower `op` to a task tree.
///
/// # Errors
///
/// Fails only when a fold-left tail branch does not lower to a map/reduce
/// job -- an internal invariant a correct tree cannot break.
pub fn crush(op: &WorkflowOp) -> Result<WorkflowTask> {
    match op {
        WorkflowOp::Pure(value) => Ok(WorkflowTask::Pure(value.clone())),
        WorkflowOp::Read(coll) => Ok(WorkflowTask::Read(coll.clone())),

        // A JS predicate cannot ride in a pipeline; filter via map/reduce.
        WorkflowOp::Match(src, sel) if sel.contains_where() => {
            let job = MapReduce {
                selection: Some(sel.clone()),
                ..MapReduce::new(js::map_nop(), js::reduce_nop())
            };
            Ok(WorkflowTask::MapReduce(Box::new(crush(src)?), job))
        }

        op if op.is_pipeline_op() => {
            let (base, stages) = pipeline(op)?.expect("pipeline op lowers to stages");
            Ok(WorkflowTask::Pipeline(Box::new(base), stages))
        }

        WorkflowOp::Map(src, fun) => crush_js(src, &js::map_emit(fun), Some(fun)),
        WorkflowOp::FlatMap(src, fun) => crush_js(src, &js::flat_map_emit(fun), None),

        WorkflowOp::Reduce(src, fun) => match crush(src)? {
            // Attach to a job that has not decided its reduce yet.
            WorkflowTask::MapReduce(upstream, job)
                if job.reduce == js::reduce_nop() && job.finalizer.is_none() =>
            {
                Ok(WorkflowTask::MapReduce(
                    upstream,
                    MapReduce {
                        reduce: fun.clone(),
                        ..job
                    },
                ))
            }
            other => Ok(WorkflowTask::MapReduce(
                Box::new(other),
                MapReduce::new(js::map_nop(), fun.clone()),
            )),
        },

        WorkflowOp::FoldLeft(branches) => {
            let head = crush(&branches[0])?;
            let tail = branches[1..]
                .iter()
                .map(|branch| match crush(branch)? {
                    WorkflowTask::MapReduce(upstream, job) => Ok(WorkflowTask::MapReduce(
                        upstream,
                        MapReduce {
                            action: OutputAction::Reduce,
                            ..job
                        },
                    )),
                    other => {
                        bail!("fold-left tail must lower to a map/reduce job, got {other:?}")
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(WorkflowTask::FoldLeft(Box::new(head), tail))
        }

        WorkflowOp::Join(branches) => Ok(WorkflowTask::Join(
            branches
                .iter()
                .map(|b| crush(b))
                .collect::<Result<Vec<_>>>()?,
        )),

        // Every other variant is a pipeline op, already handled above by the
        // `is_pipeline_op()` guard arm; the compiler can't see that the guard
        // is exhaustive over them.
        WorkflowOp::Match(..)
        | WorkflowOp::Project(..)
        | WorkflowOp::Redact(..)
        | WorkflowOp::Limit(..)
        | WorkflowOp::Skip(..)
        | WorkflowOp::Unwind(..)
        | WorkflowOp::Group(..)
        | WorkflowOp::Sort(..)
        | WorkflowOp::GeoNear(..) => unreachable!("covered by is_pipeline_op guard above"),
    }
}

/// The stage this op contributes to a pipeline, if it can ride in one.
fn stage_of(op: &WorkflowOp) -> Option<PipelineStage> {
    match op {
        WorkflowOp::Match(_, sel) if !sel.contains_where() => {
            Some(PipelineStage::Match(sel.clone()))
        }
        WorkflowOp::Project(_, shape) => Some(PipelineStage::Project(shape.clone())),
        WorkflowOp::Redact(_, e) => Some(PipelineStage::Redact(e.clone())),
        WorkflowOp::Limit(_, n) => Some(PipelineStage::Limit(*n)),
        WorkflowOp::Skip(_, n) => Some(PipelineStage::Skip(*n)),
        WorkflowOp::Unwind(_, field) => Some(PipelineStage::Unwind(field.clone())),
        WorkflowOp::Group(_, grouped, by) => {
            Some(PipelineStage::Group(grouped.clone(), by.clone()))
        }
        WorkflowOp::Sort(_, keys) => Some(PipelineStage::Sort(keys.clone())),
        WorkflowOp::GeoNear(_, geo) => Some(PipelineStage::GeoNear(geo.clone())),
        _ => None,
    }
}

/// Collect the longest pipeline-expressible run ending at `op`: the stages in
/// execution order plus the task everything upstream lowers to.
fn pipeline(op: &WorkflowOp) -> Result<Option<(WorkflowTask, Vec<PipelineStage>)>> {
    let Some(stage) = stage_of(op) else {
        return Ok(None);
    };
    let src = op.src().expect("pipeline op has a source");
    match pipeline(src)? {
        Some((base, mut stages)) => {
            stages.push(stage);
            Ok(Some((base, stages)))
        }
        None => Ok(Some((crush(src)?, vec![stage]))),
    }
}

/// Lower a JS op. `emitter` is the wrapped function for the job's map slot;
/// `finalizable` carries the raw function when the op is a plain map, which
/// may instead become the finalize step of the job it follows.
fn crush_js(src: &WorkflowOp, emitter: &js::Js, finalizable: Option<&js::Js>) -> Result<WorkflowTask> {
    let (base, selection, input_sort, limit) = peel_prefix(src);
    if selection.is_some() || input_sort.is_some() || limit.is_some() {
        let job = MapReduce {
            selection,
            input_sort,
            limit,
            ..MapReduce::new(emitter.clone(), js::reduce_nop())
        };
        return Ok(WorkflowTask::MapReduce(Box::new(crush(&base)?), job));
    }
    let upstream = crush(src)?;
    if let Some(fun) = finalizable {
        if let WorkflowTask::MapReduce(inner, job) = &upstream {
            if job.finalizer.is_none() {
                return Ok(WorkflowTask::MapReduce(
                    inner.clone(),
                    MapReduce {
                        finalizer: Some(js::finalize_value(fun)),
                        ..job.clone()
                    },
                ));
            }
        }
    }
    Ok(WorkflowTask::MapReduce(
        Box::new(upstream),
        MapReduce::new(emitter.clone(), js::reduce_nop()),
    ))
}

/// Peel a trailing match/sort/limit run off `src` into map/reduce parameters.
///
/// The job applies selection, then sort, then limit, so walking outside-in we
/// may take at most one limit, then one sort, then one match -- any legal
/// combination is a descending subsequence of that order. Returns the op
/// below the peeled run and the captured parameters.
fn peel_prefix(
    src: &WorkflowOp,
) -> (WorkflowOp, Option<Selector>, Option<SortKeys>, Option<i64>) {
    let mut cur = src.clone();
    let mut selection = None;
    let mut input_sort = None;
    let mut limit = None;
    let mut rank = 3;
    loop {
        cur = match &cur {
            WorkflowOp::Limit(s, n) if rank > 2 => {
                limit = Some(*n);
                rank = 2;
                s.as_ref().clone()
            }
            WorkflowOp::Sort(s, keys) if rank > 1 => {
                input_sort = Some(keys.clone());
                rank = 1;
                s.as_ref().clone()
            }
            WorkflowOp::Match(s, sel) if rank > 0 => {
                selection = Some(sel.clone());
                rank = 0;
                s.as_ref().clone()
            }
            _ => break,
        };
    }
    (cur, selection, input_sort, limit)
}
