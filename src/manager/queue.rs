// src/manager/queue.rs

//! Queue slots and the merge policy
//!
//! The queue holds at most two entries:
//!
//! - `current`: the entry the dispatcher is running
//! - `pending`: the next entry, still open for merging
//!
//! Adding while `pending` is empty fills it. Adding while it is occupied
//! folds the new request into the waiting transaction (set union) and
//! attaches the new caller to the same entry, so a burst of requests made
//! while something runs collapses into exactly one follow-up transaction.

use crate::error::TransactionError;
use crate::transaction::Transaction;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

type Outcome = Result<Transaction, TransactionError>;

/// Awaitable result of an `add()` call
///
/// Resolves once the dispatcher is done with the entry the request ended up
/// in, or as soon as that entry is cancelled.
#[derive(Debug)]
pub struct CompletionHandle {
    transaction: Transaction,
    rx: oneshot::Receiver<Outcome>,
}

impl CompletionHandle {
    /// The transaction this request is part of (the combined one after a merge)
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Wait for the outcome
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(TransactionError::Shutdown))
    }

    /// A handle that is already rejected
    pub(crate) fn rejected(transaction: Transaction, error: TransactionError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { transaction, rx }
    }
}

/// A queued transaction plus everyone waiting on it
#[derive(Debug)]
pub struct QueueEntry {
    transaction: Transaction,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

impl QueueEntry {
    fn new(transaction: Transaction) -> (Self, CompletionHandle) {
        let mut entry = Self {
            transaction,
            waiters: Vec::new(),
        };
        let handle = entry.attach();
        (entry, handle)
    }

    /// Register another waiter on this entry
    fn attach(&mut self) -> CompletionHandle {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        CompletionHandle {
            transaction: self.transaction.clone(),
            rx,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Deliver the outcome to every waiter (callers that went away are skipped)
    pub fn resolve(self, outcome: Outcome) {
        for waiter in self.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// The entry being dispatched
#[derive(Debug)]
pub struct ActiveEntry {
    pub entry: QueueEntry,
    pub cancel: CancellationToken,
    /// Started when the entry was dispatched, not when it was queued
    pub started: Instant,
}

/// What `push` did with a new request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The request now occupies the pending slot
    Queued,
    /// The request was folded into the waiting transaction `into`
    Merged { into: Uuid, conflicts: Vec<String> },
}

/// Pending/current slots plus the observer-visible transaction list
#[derive(Debug, Default)]
pub struct TransactionQueue {
    pending: Option<QueueEntry>,
    current: Option<ActiveEntry>,
    /// Finished, current and pending transactions in submission order
    transactions: Vec<Transaction>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transaction or merge it into the waiting one
    pub fn push(&mut self, transaction: Transaction) -> (CompletionHandle, PushOutcome) {
        if let Some(pending) = self.pending.as_mut() {
            let conflicts = pending.transaction.absorb(&transaction);
            if !conflicts.is_empty() {
                warn!(
                    "Merged transaction {} both adds and removes: {}",
                    pending.transaction.id(),
                    conflicts.join(", ")
                );
            }
            let handle = pending.attach();
            let outcome = PushOutcome::Merged {
                into: pending.transaction.id(),
                conflicts,
            };
            return (handle, outcome);
        }

        let (entry, handle) = QueueEntry::new(transaction);
        self.transactions.push(entry.transaction.clone());
        self.pending = Some(entry);
        (handle, PushOutcome::Queued)
    }

    /// Remove the oldest undispatched entry
    pub fn take_pending(&mut self) -> Option<QueueEntry> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&Transaction> {
        self.pending.as_ref().map(|e| &e.transaction)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Install `entry` as the running one
    pub fn set_current(&mut self, entry: QueueEntry, cancel: CancellationToken) {
        if let Some(previous) = self.current.replace(ActiveEntry {
            entry,
            cancel,
            started: Instant::now(),
        }) {
            // Single-flight: only reachable if the dispatcher lost track of a run
            warn!("Replacing running transaction {}", previous.entry.transaction.id());
            previous.cancel.cancel();
            previous.entry.resolve(Err(TransactionError::Cancelled));
        }
    }

    pub fn current(&self) -> Option<&Transaction> {
        self.current.as_ref().map(|a| &a.entry.transaction)
    }

    /// Detach the running entry, but only if it is still `id`
    pub fn take_current(&mut self, id: Uuid) -> Option<ActiveEntry> {
        match &self.current {
            Some(active) if active.entry.transaction.id() == id => self.current.take(),
            _ => None,
        }
    }

    /// Detach whatever is running
    pub fn detach_current(&mut self) -> Option<ActiveEntry> {
        self.current.take()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Drop finished transactions from the visible list
    pub fn clear_finished(&mut self) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|t| !t.is_finished());
        before - self.transactions.len()
    }
}
