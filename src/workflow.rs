//! Plan normalization and the end-to-end entry point.
//!
//! `finish` normalizes an op tree (coalesce, then prune with an empty used
//! set); `workflow` lowers the finished tree to tasks and reports what the
//! normalization accomplished, the way the planner of a batch framework
//! reports its optimization decisions.
//!
//! The pass order is intentional:
//! 1) coalesce (local fusion, op count only shrinks)
//! 2) prune (dead fields; needs coalesced shapes to see real uses)
//! 3) crush (lowering; no further optimization)

use crate::coalesce::coalesce;
use crate::crush::crush;
use crate::op::WorkflowOp;
use crate::prune::{defined_field_count, prune};
use crate::task::WorkflowTask;
use anyhow::Result;
use std::collections::HashSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Normalize an op tree: coalesce, then prune dead fields.
///
/// The result is closed under both passes: finishing a finished tree is a
/// no-op.
#[must_use]
pub fn finish(op: &WorkflowOp) -> WorkflowOp {
    prune(&coalesce(op), &HashSet::new())
}

/// A normalization decision made while planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    /// Coalescing fused adjacent ops.
    CoalescedOps {
        /// Op count before fusion.
        before: usize,
        /// Op count after fusion.
        after: usize,
    },
    /// Pruning removed fields nothing downstream reads.
    PrunedFields {
        /// Defined-field count before pruning.
        before: usize,
        /// Defined-field count after pruning.
        after: usize,
    },
}

/// A finalized workflow: the executable task tree plus the decisions that
/// shaped it.
#[derive(Clone, Debug, PartialEq)]
pub struct Workflow {
    pub task: WorkflowTask,
    pub decisions: Vec<PlanDecision>,
}

/// Normalize and lower `op` in one call.
///
/// # Errors
///
/// Propagates the crusher's fold-left invariant failure; see
/// [`crush`](crate::crush::crush).
pub fn workflow(op: &WorkflowOp) -> Result<Workflow> {
    let mut decisions = Vec::new();

    let ops_before = op.op_count();
    let coalesced = coalesce(op);
    let ops_after = coalesced.op_count();
    if ops_after < ops_before {
        decisions.push(PlanDecision::CoalescedOps {
            before: ops_before,
            after: ops_after,
        });
    }

    let fields_before = defined_field_count(&coalesced);
    let pruned = prune(&coalesced, &HashSet::new());
    let fields_after = defined_field_count(&pruned);
    if fields_after < fields_before {
        decisions.push(PlanDecision::PrunedFields {
            before: fields_before,
            after: fields_after,
        });
    }

    Ok(Workflow {
        task: crush(&pruned)?,
        decisions,
    })
}

/// One line of an explained plan.
#[derive(Debug, Clone)]
pub struct ExplainStep {
    /// Nesting depth within the task tree.
    pub depth: usize,
    /// Task kind.
    pub task: &'static str,
    /// Human-readable description.
    pub detail: String,
}

/// Detailed, renderable explanation of a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowExplanation {
    pub steps: Vec<ExplainStep>,
    pub decisions: Vec<PlanDecision>,
}

impl Workflow {
    /// Produce a step-by-step explanation of the task tree and the
    /// normalization decisions behind it.
    #[must_use]
    pub fn explain(&self) -> WorkflowExplanation {
        fn walk(task: &WorkflowTask, depth: usize, steps: &mut Vec<ExplainStep>) {
            let detail = match task {
                WorkflowTask::Pure(value) => format!("inline value {value}"),
                WorkflowTask::Read(coll) => format!("read collection '{coll}'"),
                WorkflowTask::Pipeline(_, stages) => {
                    let names: Vec<&str> =
                        stages.iter().map(crate::task::PipelineStage::name).collect();
                    format!("{} stage(s): [{}]", stages.len(), names.join(", "))
                }
                WorkflowTask::MapReduce(_, job) => {
                    let mut parts = vec!["map", "reduce"];
                    if job.selection.is_some() {
                        parts.push("selection");
                    }
                    if job.input_sort.is_some() {
                        parts.push("sort");
                    }
                    if job.limit.is_some() {
                        parts.push("limit");
                    }
                    if job.finalizer.is_some() {
                        parts.push("finalize");
                    }
                    format!("map/reduce job ({}) out={:?}", parts.join("+"), job.action)
                }
                WorkflowTask::FoldLeft(_, tail) => {
                    format!("fold {} job(s) into one collection", tail.len() + 1)
                }
                WorkflowTask::Join(branches) => {
                    format!("join {} independent task(s)", branches.len())
                }
            };
            steps.push(ExplainStep {
                depth,
                task: task.label(),
                detail,
            });
            match task {
                WorkflowTask::Pipeline(up, _) | WorkflowTask::MapReduce(up, _) => {
                    walk(up, depth + 1, steps);
                }
                WorkflowTask::FoldLeft(head, tail) => {
                    walk(head, depth + 1, steps);
                    for t in tail {
                        walk(t, depth + 1, steps);
                    }
                }
                WorkflowTask::Join(branches) => {
                    for b in branches {
                        walk(b, depth + 1, steps);
                    }
                }
                WorkflowTask::Pure(_) | WorkflowTask::Read(_) => {}
            }
        }
        let mut steps = Vec::new();
        walk(&self.task, 0, &mut steps);
        WorkflowExplanation {
            steps,
            decisions: self.decisions.clone(),
        }
    }
}

impl Display for WorkflowExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(
            f,
            "╔═══════════════════════════════════════════════════════════════╗"
        )?;
        writeln!(
            f,
            "║                    WORKFLOW PLAN                              ║"
        )?;
        writeln!(
            f,
            "╚═══════════════════════════════════════════════════════════════╝"
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "┌─ TASKS ──────────────────────────────────────────────────────┐"
        )?;
        for step in &self.steps {
            writeln!(
                f,
                "│ {:indent$}{}: {}",
                "",
                step.task,
                step.detail,
                indent = step.depth * 2
            )?;
        }
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )?;
        if !self.decisions.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "┌─ NORMALIZATION ──────────────────────────────────────────────┐"
            )?;
            for decision in &self.decisions {
                match decision {
                    PlanDecision::CoalescedOps { before, after } => {
                        writeln!(f, "│ • Coalesced ops: {before} → {after}")?;
                    }
                    PlanDecision::PrunedFields { before, after } => {
                        writeln!(f, "│ • Pruned dead fields: {before} → {after}")?;
                    }
                }
            }
            writeln!(
                f,
                "└──────────────────────────────────────────────────────────────┘"
            )?;
        }
        Ok(())
    }
}
