// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bazaar::backend::{Backend, BackendEvent, EventSender};
use bazaar::confirm::HeadlessConfirmer;
use bazaar::hooks::HookConfig;
use bazaar::manager::{ManagerEvent, TransactionManager};
use bazaar::{HookRunnerConfig, ManagerConfig, Transaction, TransactionRequest};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// How long a test waits for an event before giving up
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scripted backend
///
/// Every call records the merged request, replays `events` in order and then
/// completes (or fails). Optionally each call first waits for a permit from
/// a gate, or keeps running until its cancellation token fires.
#[derive(Default)]
pub struct MockBackend {
    events: Vec<BackendEvent>,
    failure: Option<String>,
    gate: Option<Arc<Semaphore>>,
    block_until_cancelled: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<TransactionRequest>>,
    tokens: Mutex<Vec<CancellationToken>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

/// Decrements the running counter even if the call is dropped mid-way
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events<I, E>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<BackendEvent>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Each call waits for one permit of `gate` before doing anything
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn blocking_until_cancelled(mut self) -> Self {
        self.block_until_cancelled = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests seen so far, one per call
    pub fn calls(&self) -> Vec<TransactionRequest> {
        self.calls.lock().clone()
    }

    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().clone()
    }

    /// Highest number of calls that were ever in flight at once
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn merge_and_schedule(
        &self,
        transactions: &[Transaction],
        events: EventSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let mut request = TransactionRequest::default();
        for txn in transactions {
            request.union(&txn.request());
        }
        self.calls.lock().push(request);
        self.tokens.lock().push(cancel.clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }

        for event in &self.events {
            if cancel.is_cancelled() || events.send(event.clone()).await.is_err() {
                break;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }

        if self.block_until_cancelled {
            cancel.cancelled().await;
        }
        drop(events);

        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

/// Manager over `backend` with no hooks
pub fn manager_with(backend: Arc<MockBackend>) -> TransactionManager {
    manager_with_hooks(backend, HookConfig::default())
}

/// Manager over `backend` running `hooks` headless from the temp dir
pub fn manager_with_hooks(backend: Arc<MockBackend>, hooks: HookConfig) -> TransactionManager {
    let config = ManagerConfig::default()
        .with_runner(HookRunnerConfig::default().with_working_dir(std::env::temp_dir()));
    TransactionManager::new(config, backend, hooks, Arc::new(HeadlessConfirmer))
}

/// Receive events until one matches `pred`, returning it
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<ManagerEvent>, mut pred: F) -> ManagerEvent
where
    F: FnMut(&ManagerEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for manager event")
}

/// Everything already sitting in the receiver
pub fn drain(rx: &mut broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `cond` until it holds
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}
