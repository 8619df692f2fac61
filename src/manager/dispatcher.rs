// src/manager/dispatcher.rs

//! Single-flight dispatch loop
//!
//! At most one dispatcher task exists per manager (guarded by the
//! `dispatching` flag in the manager state). It repeatedly takes the pending
//! entry, runs it to completion and goes idle when the queue is empty, the
//! manager is paused, or it is shutting down.
//!
//! Running one entry:
//!
//! 1. `before-transaction` hooks for every package (a DENY fails the entry)
//! 2. `Backend::merge_and_schedule` while draining its event channel
//! 3. `after-transaction` hooks (failures are only logged)
//! 4. stamp the terminal state, resolve waiters, emit `Succeeded`/`Failed`

use super::queue::ActiveEntry;
use super::{ManagerEvent, ManagerInner};
use crate::error::TransactionError;
use crate::hooks::{HookContext, HookSignal};
use crate::progress::{ProgressAggregator, TaskChange};
use crate::transaction::Transaction;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Dispatch entries until there is nothing (allowed) left to run
pub(crate) async fn dispatch_loop(inner: Arc<ManagerInner>) {
    loop {
        let (transaction, cancel) = {
            let mut state = inner.state.lock();
            if state.paused || state.shut_down {
                state.dispatching = false;
                return;
            }
            let Some(entry) = state.queue.take_pending() else {
                state.dispatching = false;
                return;
            };

            let transaction = entry.transaction().clone();
            let cancel = inner.shutdown.child_token();
            state.queue.set_current(entry, cancel.clone());
            transaction.mark_started();
            (transaction, cancel)
        };

        info!(
            "Dispatching transaction {} ({} package(s))",
            transaction.id(),
            transaction.request().len()
        );
        inner.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
        inner.emit(ManagerEvent::Started {
            transaction: transaction.clone(),
        });

        let outcome = tokio::select! {
            result = run_transaction(&inner, &transaction, &cancel) => result,
            _ = cancel.cancelled() => Err(TransactionError::Cancelled),
        };

        let active = inner.state.lock().queue.take_current(transaction.id());
        match active {
            Some(active) => complete(&inner, active, outcome),
            None => debug!(
                "Transaction {} was detached before it completed",
                transaction.id()
            ),
        }
    }
}

/// Hooks, backend call and event draining for one transaction
async fn run_transaction(
    inner: &ManagerInner,
    transaction: &Transaction,
    cancel: &CancellationToken,
) -> Result<(), TransactionError> {
    let entries = transaction.request().entries();

    transaction.set_status("Running hooks");
    for (kind, app_id) in &entries {
        let context = HookContext::transaction(*kind, app_id.as_str());
        inner.runner.emit(&HookSignal::BeforeTransaction, &context).await?;
    }

    transaction.set_status("Scheduling");
    let (events_tx, mut events_rx) = mpsc::channel(inner.config.event_buffer.max(1));
    let batch = [transaction.clone()];
    let schedule = inner
        .backend
        .merge_and_schedule(&batch, events_tx, cancel.clone());

    let drain = async {
        let mut aggregator = ProgressAggregator::new();
        while let Some(event) = events_rx.recv().await {
            debug!("Transaction {} event: {:?}", transaction.id(), event);
            let update = aggregator.apply(&event);

            match update.task {
                Some(TaskChange::Started(task)) => transaction.upsert_task(task),
                Some(TaskChange::Progress {
                    op,
                    message,
                    estimating,
                }) => {
                    transaction.update_task(&op, |task| {
                        task.message = Some(message);
                        task.estimating = estimating;
                    });
                }
                Some(TaskChange::Finished(task)) => {
                    let status = task.status.clone();
                    let known = transaction.update_task(&task.op, |existing| {
                        existing.status = status;
                        existing.estimating = false;
                    });
                    if !known {
                        transaction.upsert_task(task);
                    }
                }
                None => {}
            }

            transaction.apply_progress(update.progress, update.pending, update.status.as_deref());
            inner.emit(ManagerEvent::Progress {
                id: transaction.id(),
                progress: transaction.progress(),
                pending: transaction.is_pending(),
                status: transaction.status(),
            });
        }
        transaction.set_pending(false);
    };

    let (result, ()) = tokio::join!(schedule, drain);

    for (kind, app_id) in &entries {
        let context = HookContext::transaction(*kind, app_id.as_str());
        if let Err(e) = inner.runner.emit(&HookSignal::AfterTransaction, &context).await {
            warn!("Ignoring after-transaction hook result for {}: {}", app_id, e);
        }
    }

    result.map_err(|e| TransactionError::Backend {
        message: format!("{:#}", e),
    })
}

/// Stamp the terminal state and notify everyone
pub(crate) fn complete(inner: &ManagerInner, active: ActiveEntry, outcome: Result<(), TransactionError>) {
    let transaction = active.entry.transaction().clone();
    let seconds = active.started.elapsed().as_secs_f64();

    match outcome {
        Ok(()) => {
            transaction.finish(true, None, format!("Finished in {:.2} seconds", seconds));
            info!("Transaction {} finished in {:.2}s", transaction.id(), seconds);
            inner.metrics.succeeded.fetch_add(1, Ordering::Relaxed);
            active.entry.resolve(Ok(transaction.clone()));
            inner.emit(ManagerEvent::Succeeded { transaction });
        }
        Err(error) if error.is_cancellation() => {
            transaction.finish(false, None, "Cancelled".to_string());
            info!("Transaction {} cancelled", transaction.id());
            inner.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
            active.entry.resolve(Err(error));
            inner.emit(ManagerEvent::Cancelled { transaction });
        }
        Err(error) => {
            let message = error.to_string();
            transaction.finish(false, Some(message.clone()), message);
            warn!("Transaction {} failed after {:.2}s: {}", transaction.id(), seconds, error);
            inner.metrics.failed.fetch_add(1, Ordering::Relaxed);
            active.entry.resolve(Err(error.clone()));
            inner.emit(ManagerEvent::Failed { transaction, error });
        }
    }
}
