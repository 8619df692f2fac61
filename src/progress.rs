// src/progress.rs

//! Progress and pending aggregation
//!
//! Folds the backend's event stream into the two numbers observers care
//! about for a running transaction:
//!
//! - a completion fraction (never decreasing until the transaction finishes)
//! - a "pending" flag: true only while *every* active op is still estimating
//!   its size, i.e. the size of the whole transaction is still unknown
//!
//! The aggregator is a plain state machine with no I/O. The dispatcher feeds
//! it events in arrival order and applies each [`ProgressUpdate`] to the
//! transaction.

use crate::backend::{BackendEvent, Op, OpId, OpProgress, OpStatus};
use crate::transaction::{TaskStatus, TransactionTask};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What a single event changed
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Aggregated completion fraction
    pub progress: f64,
    /// Aggregated pending flag
    pub pending: bool,
    /// New status text, if the event carried one
    pub status: Option<String>,
    /// Task change implied by the event
    pub task: Option<TaskChange>,
}

/// Change to a per-op task record
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    /// A new op became active
    Started(TransactionTask),
    /// An existing op reported progress
    Progress {
        op: OpId,
        message: String,
        estimating: bool,
    },
    /// An op reached its terminal state
    ///
    /// Carries the whole record so ops that only ever reported progress
    /// still end up with one.
    Finished(TransactionTask),
}

/// Aggregates op events for one transaction
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    active_ops: HashSet<OpId>,
    estimating_ops: HashSet<OpId>,
    finished_ops: HashSet<OpId>,
    /// Last status text per active op
    messages: HashMap<OpId, String>,
    progress: f64,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current completion fraction
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// True only while at least one op is active and all of them are estimating
    pub fn is_pending(&self) -> bool {
        !self.active_ops.is_empty() && self.estimating_ops.len() == self.active_ops.len()
    }

    /// Number of ops currently active
    pub fn active_count(&self) -> usize {
        self.active_ops.len()
    }

    /// Fold one event
    pub fn apply(&mut self, event: &BackendEvent) -> ProgressUpdate {
        let (status, task) = match event {
            BackendEvent::Op(op) => (None, self.apply_op(op)),
            BackendEvent::Progress(progress) => {
                let task = self.apply_progress(progress);
                (Some(progress.status.clone()), task)
            }
        };

        ProgressUpdate {
            progress: self.progress,
            pending: self.is_pending(),
            status,
            task,
        }
    }

    fn apply_op(&mut self, op: &Op) -> Option<TaskChange> {
        match &op.status {
            OpStatus::Started { estimating } => {
                if self.finished_ops.contains(&op.id) || !self.active_ops.insert(op.id.clone()) {
                    debug!("Ignoring duplicate start for op {}", op.id);
                    return None;
                }
                self.set_estimating(&op.id, *estimating);
                Some(TaskChange::Started(TransactionTask {
                    op: op.id.clone(),
                    kind: op.kind,
                    package: op.package.clone(),
                    status: TaskStatus::Running,
                    message: None,
                    estimating: *estimating,
                }))
            }
            OpStatus::Succeeded | OpStatus::Failed { .. } => {
                self.active_ops.remove(&op.id);
                self.estimating_ops.remove(&op.id);
                if !self.finished_ops.insert(op.id.clone()) {
                    debug!("Ignoring duplicate terminal event for op {}", op.id);
                    return None;
                }
                let status = match &op.status {
                    OpStatus::Failed { message } => TaskStatus::Failed {
                        message: message.clone(),
                    },
                    _ => TaskStatus::Succeeded,
                };
                Some(TaskChange::Finished(TransactionTask {
                    op: op.id.clone(),
                    kind: op.kind,
                    package: op.package.clone(),
                    status,
                    message: self.messages.remove(&op.id),
                    estimating: false,
                }))
            }
        }
    }

    fn apply_progress(&mut self, progress: &OpProgress) -> Option<TaskChange> {
        if !progress.total_progress.is_nan() {
            self.progress = self.progress.max(progress.total_progress.clamp(0.0, 1.0));
        }

        // Progress for an op that has already finished is stale
        if self.finished_ops.contains(&progress.op) {
            return None;
        }

        // Some backends never send an explicit start; the first progress
        // event makes the op active.
        self.active_ops.insert(progress.op.clone());
        self.set_estimating(&progress.op, progress.is_estimating);
        self.messages.insert(progress.op.clone(), progress.status.clone());

        Some(TaskChange::Progress {
            op: progress.op.clone(),
            message: progress.status.clone(),
            estimating: progress.is_estimating,
        })
    }

    fn set_estimating(&mut self, op: &OpId, estimating: bool) {
        if estimating {
            self.estimating_ops.insert(op.clone());
        } else {
            self.estimating_ops.remove(op);
        }
    }
}
