// src/manager/mod.rs

//! Transaction manager
//!
//! The public entry point of the engine. Callers hand in transactions with
//! [`TransactionManager::add`] and get a [`CompletionHandle`] back right away;
//! the manager queues (or merges) the request and makes sure a single
//! dispatcher task runs transactions one at a time.
//!
//! Observers either poll the read-only accessors (`transactions`,
//! `is_active`, `is_pending`, `current_progress`, `snapshot`) or subscribe to
//! the [`ManagerEvent`] broadcast.
//!
//! # Example
//!
//! ```no_run
//! use bazaar::confirm::HeadlessConfirmer;
//! use bazaar::hooks::HookConfig;
//! use bazaar::manager::TransactionManager;
//! use bazaar::{ManagerConfig, Transaction};
//! use std::sync::Arc;
//!
//! # async fn demo(backend: Arc<dyn bazaar::backend::Backend>) {
//! let manager = TransactionManager::new(
//!     ManagerConfig::default(),
//!     backend,
//!     HookConfig::default(),
//!     Arc::new(HeadlessConfirmer),
//! );
//!
//! let handle = manager.add(Transaction::new().with_installs(["org.gnome.Maps"]));
//! match handle.wait().await {
//!     Ok(txn) => println!("{}", txn.status()),
//!     Err(e) => eprintln!("{}", e),
//! }
//! # }
//! ```

mod dispatcher;
pub mod queue;

pub use queue::{CompletionHandle, PushOutcome, QueueEntry, TransactionQueue};

use crate::backend::Backend;
use crate::config::ManagerConfig;
use crate::confirm::Confirmer;
use crate::error::{HookError, TransactionError};
use crate::hooks::{EmissionOutcome, HookConfig, HookContext, HookRunner, HookSignal};
use crate::transaction::{Transaction, TransactionRequest, TransactionState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Events broadcast by the manager
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A transaction took the pending slot
    Queued { transaction: Transaction },
    /// A request was folded into the pending transaction
    Merged {
        transaction: Transaction,
        conflicts: Vec<String>,
    },
    /// The dispatcher picked a transaction up
    Started { transaction: Transaction },
    /// Live fields of the running transaction changed
    Progress {
        id: Uuid,
        progress: f64,
        pending: bool,
        status: String,
    },
    /// The backend finished the transaction without error
    Succeeded { transaction: Transaction },
    /// A hook denied the transaction or the backend returned an error
    Failed {
        transaction: Transaction,
        error: TransactionError,
    },
    /// Cancelled by the caller or by shutdown (never reported as `Failed`)
    Cancelled { transaction: Transaction },
    /// Dispatch of new transactions stopped
    Paused,
    /// Dispatch allowed again
    Resumed,
}

/// Manager counters
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    /// Requests that took the pending slot
    pub queued: AtomicU64,
    /// Requests merged into a pending transaction
    pub merged: AtomicU64,
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
}

/// Serializable view of one transaction
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub request: TransactionRequest,
    pub state: TransactionState,
}

impl From<&Transaction> for TransactionSnapshot {
    fn from(txn: &Transaction) -> Self {
        Self {
            id: txn.id(),
            created_at: txn.created_at(),
            request: txn.request(),
            state: txn.state(),
        }
    }
}

/// Serializable view of every observable manager property
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub active: bool,
    pub pending: bool,
    pub paused: bool,
    pub current_progress: f64,
    pub current: Option<Uuid>,
    pub queued: Option<Uuid>,
    pub transactions: Vec<TransactionSnapshot>,
}

pub(crate) struct ManagerState {
    pub(crate) queue: TransactionQueue,
    /// A dispatcher task exists
    pub(crate) dispatching: bool,
    pub(crate) paused: bool,
    pub(crate) shut_down: bool,
}

pub(crate) struct ManagerInner {
    pub(crate) config: ManagerConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) runner: HookRunner,
    pub(crate) state: Mutex<ManagerState>,
    /// Parent of every per-transaction cancellation token
    pub(crate) shutdown: CancellationToken,
    pub(crate) metrics: ManagerMetrics,
    event_tx: broadcast::Sender<ManagerEvent>,
}

impl ManagerInner {
    /// Broadcast an event to all subscribers
    pub(crate) fn emit(&self, event: ManagerEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Flip `dispatching` on if a dispatcher should be started
    fn claim_dispatch(state: &mut ManagerState) -> bool {
        if state.dispatching || state.paused || state.shut_down || !state.queue.has_pending() {
            return false;
        }
        state.dispatching = true;
        true
    }
}

/// Queues transactions and runs them one at a time
///
/// Cheap to clone; all clones drive the same queue. Methods that may start a
/// dispatcher (`add`, `resume`) must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    pub fn new(
        config: ManagerConfig,
        backend: Arc<dyn Backend>,
        hooks: HookConfig,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let runner = HookRunner::new(hooks, config.runner.clone(), confirmer);
        let state = ManagerState {
            queue: TransactionQueue::new(),
            dispatching: false,
            paused: config.start_paused,
            shut_down: false,
        };

        Self {
            inner: Arc::new(ManagerInner {
                config,
                backend,
                runner,
                state: Mutex::new(state),
                shutdown: CancellationToken::new(),
                metrics: ManagerMetrics::default(),
                event_tx,
            }),
        }
    }

    /// Queue `transaction`, merging it into the waiting one if there is one
    ///
    /// Never blocks. The returned handle resolves when the entry the request
    /// ended up in is finished or cancelled.
    pub fn add(&self, transaction: Transaction) -> CompletionHandle {
        let (handle, outcome, start) = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                debug!("Rejecting transaction {}: manager is shut down", transaction.id());
                return CompletionHandle::rejected(transaction, TransactionError::Shutdown);
            }
            let (handle, outcome) = state.queue.push(transaction);
            let start = ManagerInner::claim_dispatch(&mut state);
            (handle, outcome, start)
        };

        let transaction = handle.transaction().clone();
        match outcome {
            PushOutcome::Queued => {
                debug!("Queued transaction {}", transaction.id());
                self.inner.metrics.queued.fetch_add(1, Ordering::Relaxed);
                self.inner.emit(ManagerEvent::Queued { transaction });
            }
            PushOutcome::Merged { into, conflicts } => {
                info!("Merged request into pending transaction {}", into);
                self.inner.metrics.merged.fetch_add(1, Ordering::Relaxed);
                self.inner.emit(ManagerEvent::Merged {
                    transaction,
                    conflicts,
                });
            }
        }

        if start {
            self.spawn_dispatcher();
        }
        handle
    }

    /// Cancel the running transaction
    ///
    /// Rejects its handle with [`TransactionError::Cancelled`] and signals the
    /// backend's cancellation token. Returns false if nothing was running.
    pub fn cancel_current(&self) -> bool {
        let active = self.inner.state.lock().queue.detach_current();
        let Some(active) = active else {
            return false;
        };

        info!("Cancelling transaction {}", active.entry.transaction().id());
        active.cancel.cancel();
        dispatcher::complete(&self.inner, active, Err(TransactionError::Cancelled));
        true
    }

    /// Drop finished transactions from the list, returning how many went
    pub fn clear_finished(&self) -> usize {
        let removed = self.inner.state.lock().queue.clear_finished();
        debug!("Cleared {} finished transaction(s)", removed);
        removed
    }

    /// Stop dispatching new transactions; a running one is left alone
    pub fn pause(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.paused {
                return;
            }
            state.paused = true;
        }
        info!("Transaction dispatch paused");
        self.inner.emit(ManagerEvent::Paused);
    }

    /// Allow dispatching again, starting right away if something is queued
    pub fn resume(&self) {
        let start = {
            let mut state = self.inner.state.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            ManagerInner::claim_dispatch(&mut state)
        };
        info!("Transaction dispatch resumed");
        self.inner.emit(ManagerEvent::Resumed);
        if start {
            self.spawn_dispatcher();
        }
    }

    /// Cancel all work and refuse new requests
    ///
    /// The running transaction is cancelled, the pending one is rejected with
    /// [`TransactionError::Shutdown`], and later `add()` calls resolve
    /// immediately with the same error.
    pub fn shutdown(&self) {
        let (active, pending) = {
            let mut state = self.inner.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            (state.queue.detach_current(), state.queue.take_pending())
        };

        info!("Shutting down transaction manager");
        self.inner.shutdown.cancel();

        if let Some(active) = active {
            dispatcher::complete(&self.inner, active, Err(TransactionError::Shutdown));
        }
        if let Some(entry) = pending {
            let transaction = entry.transaction().clone();
            transaction.finish(false, None, "Cancelled".to_string());
            self.inner.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
            entry.resolve(Err(TransactionError::Shutdown));
            self.inner.emit(ManagerEvent::Cancelled { transaction });
        }
    }

    /// Run a standalone hook emission (e.g. `view-app`)
    pub async fn emit_signal(
        &self,
        signal: &HookSignal,
        context: &HookContext,
    ) -> Result<EmissionOutcome, HookError> {
        self.inner.runner.emit(signal, context).await
    }

    /// Finished, running and pending transactions in submission order
    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.state.lock().queue.transactions().to_vec()
    }

    pub fn has_transactions(&self) -> bool {
        !self.inner.state.lock().queue.transactions().is_empty()
    }

    /// True while a transaction is dispatched
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().queue.current().is_some()
    }

    /// Pending flag of the running transaction
    pub fn is_pending(&self) -> bool {
        self.current().is_some_and(|t| t.is_pending())
    }

    /// Progress of the running transaction, 0.0 when idle
    pub fn current_progress(&self) -> f64 {
        self.current().map_or(0.0, |t| t.progress())
    }

    pub fn current(&self) -> Option<Transaction> {
        self.inner.state.lock().queue.current().cloned()
    }

    /// The transaction waiting in the pending slot
    pub fn queued(&self) -> Option<Transaction> {
        self.inner.state.lock().queue.pending().cloned()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// Subscribe to manager events
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let state = self.inner.state.lock();
        let current = state.queue.current();

        ManagerSnapshot {
            active: current.is_some(),
            pending: current.is_some_and(|t| t.is_pending()),
            paused: state.paused,
            current_progress: current.map_or(0.0, |t| t.progress()),
            current: current.map(|t| t.id()),
            queued: state.queue.pending().map(|t| t.id()),
            transactions: state
                .queue
                .transactions()
                .iter()
                .map(TransactionSnapshot::from)
                .collect(),
        }
    }

    pub fn metrics(&self) -> &ManagerMetrics {
        &self.inner.metrics
    }

    pub fn runner(&self) -> &HookRunner {
        &self.inner.runner
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    fn spawn_dispatcher(&self) {
        debug!("Starting dispatcher");
        tokio::spawn(dispatcher::dispatch_loop(Arc::clone(&self.inner)));
    }
}
