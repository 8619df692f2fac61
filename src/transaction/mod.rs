// src/transaction/mod.rs

//! Transactions: batched install/update/removal requests tracked as one unit
//!
//! A [`Transaction`] is a cheap, cloneable handle. The request sets can grow
//! while the transaction is still waiting in the queue (merging mutates the
//! waiting transaction in place, so handles issued earlier stay valid). Once
//! dispatched, only the live state (status, progress, tasks) changes, and
//! after `finished` the whole thing is read-only.
//!
//! # Lifecycle
//!
//! ```text
//! created -> queued (mergeable) -> running -> finished (success | failure | cancelled)
//! ```

use crate::backend::OpId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of work requested for a single package
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionKind {
    Install,
    Update,
    Removal,
}

/// The package sets of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub installs: BTreeSet<String>,
    pub updates: BTreeSet<String>,
    pub removals: BTreeSet<String>,
}

impl TransactionRequest {
    /// Union `other` into `self`; nothing from either side is dropped
    pub fn union(&mut self, other: &TransactionRequest) {
        self.installs.extend(other.installs.iter().cloned());
        self.updates.extend(other.updates.iter().cloned());
        self.removals.extend(other.removals.iter().cloned());
    }

    /// Package ids that are both added/updated and removed
    pub fn conflicts(&self) -> Vec<String> {
        self.removals
            .iter()
            .filter(|id| self.installs.contains(*id) || self.updates.contains(*id))
            .cloned()
            .collect()
    }

    /// Every (kind, package) pair: installs, then updates, then removals
    pub fn entries(&self) -> Vec<(TransactionKind, String)> {
        let installs = self.installs.iter().map(|id| (TransactionKind::Install, id.clone()));
        let updates = self.updates.iter().map(|id| (TransactionKind::Update, id.clone()));
        let removals = self.removals.iter().map(|id| (TransactionKind::Removal, id.clone()));
        installs.chain(updates).chain(removals).collect()
    }

    pub fn len(&self) -> usize {
        self.installs.len() + self.updates.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one backend sub-operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed { message: String },
}

/// One concrete sub-operation reported by the backend (e.g. "install app X")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTask {
    pub op: OpId,
    pub kind: TransactionKind,
    pub package: String,
    pub status: TaskStatus,
    /// Last status text the backend reported for this op
    pub message: Option<String>,
    /// Whether the op is still estimating its download size
    pub estimating: bool,
}

/// Live, observable fields of a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionState {
    /// Human readable status line
    pub status: String,
    /// Completion fraction in `0.0..=1.0`
    pub progress: f64,
    /// True while every active op is still estimating
    pub pending: bool,
    pub finished: bool,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TransactionTask>,
}

struct Inner {
    id: Uuid,
    created_at: DateTime<Utc>,
    request: RwLock<TransactionRequest>,
    state: RwLock<TransactionState>,
}

/// Shared handle to a transaction
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl Transaction {
    /// Create an empty transaction
    pub fn new() -> Self {
        Self::from_request(TransactionRequest::default())
    }

    /// Create a transaction from prepared package sets
    pub fn from_request(request: TransactionRequest) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                request: RwLock::new(request),
                state: RwLock::new(TransactionState {
                    status: "Queued".to_string(),
                    ..Default::default()
                }),
            }),
        }
    }

    /// Add packages to install
    pub fn with_installs<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.request.write().installs.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add packages to update
    pub fn with_updates<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.request.write().updates.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add packages to remove
    pub fn with_removals<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.request.write().removals.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Snapshot of the package sets
    pub fn request(&self) -> TransactionRequest {
        self.inner.request.read().clone()
    }

    pub fn installs(&self) -> BTreeSet<String> {
        self.inner.request.read().installs.clone()
    }

    pub fn updates(&self) -> BTreeSet<String> {
        self.inner.request.read().updates.clone()
    }

    pub fn removals(&self) -> BTreeSet<String> {
        self.inner.request.read().removals.clone()
    }

    /// Package ids present both in a removal and an install/update set
    pub fn conflicts(&self) -> Vec<String> {
        self.inner.request.read().conflicts()
    }

    /// Absorb another transaction's package sets into this one
    ///
    /// Returns the ids that now conflict (see [`TransactionRequest::conflicts`]).
    pub fn absorb(&self, other: &Transaction) -> Vec<String> {
        if self.ptr_eq(other) {
            return self.conflicts();
        }
        let incoming = other.request();
        let mut request = self.inner.request.write();
        request.union(&incoming);
        request.conflicts()
    }

    /// Snapshot of the live state
    pub fn state(&self) -> TransactionState {
        self.inner.state.read().clone()
    }

    pub fn status(&self) -> String {
        self.inner.state.read().status.clone()
    }

    pub fn progress(&self) -> f64 {
        self.inner.state.read().progress
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.read().pending
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.read().finished
    }

    pub fn is_success(&self) -> bool {
        self.inner.state.read().success
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read().error.clone()
    }

    pub fn tasks(&self) -> Vec<TransactionTask> {
        self.inner.state.read().tasks.clone()
    }

    /// True if both handles point at the same transaction
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_started(&self) {
        let mut state = self.inner.state.write();
        if state.finished {
            return;
        }
        state.started_at = Some(Utc::now());
        state.status = "Preparing".to_string();
    }

    pub(crate) fn set_status(&self, status: impl Into<String>) {
        let mut state = self.inner.state.write();
        if !state.finished {
            state.status = status.into();
        }
    }

    /// Apply an aggregated progress reading
    ///
    /// Progress never moves backwards before the transaction finishes.
    pub(crate) fn apply_progress(&self, progress: f64, pending: bool, status: Option<&str>) {
        let mut state = self.inner.state.write();
        if state.finished {
            return;
        }
        state.progress = state.progress.max(progress.clamp(0.0, 1.0));
        state.pending = pending;
        if let Some(status) = status {
            state.status = status.to_string();
        }
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        let mut state = self.inner.state.write();
        if !state.finished {
            state.pending = pending;
        }
    }

    /// Insert or update the task record for an op
    pub(crate) fn upsert_task(&self, task: TransactionTask) {
        let mut state = self.inner.state.write();
        if state.finished {
            return;
        }
        match state.tasks.iter_mut().find(|t| t.op == task.op) {
            Some(existing) => *existing = task,
            None => state.tasks.push(task),
        }
    }

    pub(crate) fn update_task<F: FnOnce(&mut TransactionTask)>(&self, op: &OpId, f: F) -> bool {
        let mut state = self.inner.state.write();
        if state.finished {
            return false;
        }
        match state.tasks.iter_mut().find(|t| &t.op == op) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    /// Stamp the terminal state; `finished` always implies `progress == 1.0`
    ///
    /// Returns false if the transaction had already finished.
    pub(crate) fn finish(&self, success: bool, error: Option<String>, status: String) -> bool {
        let mut state = self.inner.state.write();
        if state.finished {
            return false;
        }
        state.finished = true;
        state.success = success;
        state.error = error;
        state.status = status;
        state.progress = 1.0;
        state.pending = false;
        state.finished_at = Some(Utc::now());
        true
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let request = self.inner.request.read();
        let state = self.inner.state.read();
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("installs", &request.installs)
            .field("updates", &request.updates)
            .field("removals", &request.removals)
            .field("status", &state.status)
            .field("progress", &state.progress)
            .field("finished", &state.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_unions_all_sets() {
        let first = Transaction::new()
            .with_installs(["org.gnome.Maps"])
            .with_removals(["org.gnome.Weather"]);
        let second = Transaction::new()
            .with_installs(["org.gnome.Maps", "org.gnome.Clocks"])
            .with_updates(["org.mozilla.firefox"]);

        let conflicts = first.absorb(&second);
        assert!(conflicts.is_empty());

        let request = first.request();
        assert_eq!(request.installs.len(), 2);
        assert!(request.installs.contains("org.gnome.Clocks"));
        assert!(request.updates.contains("org.mozilla.firefox"));
        assert!(request.removals.contains("org.gnome.Weather"));

        // The absorbed operand is untouched
        assert_eq!(second.installs().len(), 2);
        assert!(second.removals().is_empty());
    }

    #[test]
    fn test_absorb_keeps_conflicting_ids() {
        let first = Transaction::new().with_installs(["org.app.A"]);
        let second = Transaction::new().with_removals(["org.app.A"]);

        let conflicts = first.absorb(&second);
        assert_eq!(conflicts, vec!["org.app.A".to_string()]);
        assert!(first.installs().contains("org.app.A"));
        assert!(first.removals().contains("org.app.A"));
    }

    #[test]
    fn test_entries_order() {
        let txn = Transaction::new()
            .with_removals(["c"])
            .with_updates(["b"])
            .with_installs(["a"]);

        let entries = txn.request().entries();
        assert_eq!(
            entries,
            vec![
                (TransactionKind::Install, "a".to_string()),
                (TransactionKind::Update, "b".to_string()),
                (TransactionKind::Removal, "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_progress_is_monotonic_and_finish_forces_one() {
        let txn = Transaction::new().with_installs(["org.app.A"]);

        txn.apply_progress(0.4, false, Some("Downloading"));
        txn.apply_progress(0.2, false, None);
        assert_eq!(txn.progress(), 0.4);
        assert_eq!(txn.status(), "Downloading");

        assert!(txn.finish(true, None, "Finished".to_string()));
        assert_eq!(txn.progress(), 1.0);
        assert!(txn.is_finished());

        // Read-only after finish
        txn.apply_progress(0.1, true, Some("late"));
        assert_eq!(txn.progress(), 1.0);
        assert_eq!(txn.status(), "Finished");
        assert!(!txn.finish(false, Some("late".to_string()), "late".to_string()));
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(TransactionKind::Removal.to_string(), "removal");
        assert_eq!("update".parse::<TransactionKind>().unwrap(), TransactionKind::Update);
    }
}
