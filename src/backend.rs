// src/backend.rs

//! Backend contract
//!
//! The backend is the part that actually installs, updates and removes
//! packages. The engine only ever calls [`Backend::merge_and_schedule`] and
//! listens to the event channel it hands over. The backend owns the sender:
//! dropping it (normally by returning) closes the channel, which is what ends
//! event draining on the engine side.

use crate::transaction::{Transaction, TransactionKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identity of one backend sub-operation
///
/// Backends must reuse the same id for the "started" and terminal events of
/// an op so they can be correlated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub String);

impl OpId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OpId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state carried by an [`Op`] event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OpStatus {
    /// The op became active; `estimating` is true while its size is unknown
    Started { estimating: bool },
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed { message: String },
}

impl OpStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started { .. })
    }
}

/// One concrete sub-operation (e.g. "install app X")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub id: OpId,
    pub kind: TransactionKind,
    pub package: String,
    pub status: OpStatus,
}

impl Op {
    pub fn started(id: impl Into<OpId>, kind: TransactionKind, package: &str, estimating: bool) -> Self {
        Self {
            id: id.into(),
            kind,
            package: package.to_string(),
            status: OpStatus::Started { estimating },
        }
    }

    pub fn succeeded(id: impl Into<OpId>, kind: TransactionKind, package: &str) -> Self {
        Self {
            id: id.into(),
            kind,
            package: package.to_string(),
            status: OpStatus::Succeeded,
        }
    }

    pub fn failed(id: impl Into<OpId>, kind: TransactionKind, package: &str, message: &str) -> Self {
        Self {
            id: id.into(),
            kind,
            package: package.to_string(),
            status: OpStatus::Failed {
                message: message.to_string(),
            },
        }
    }
}

/// Incremental progress for an op
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpProgress {
    pub op: OpId,
    /// Status text to show for the whole transaction
    pub status: String,
    /// True while the op is still working out its size
    pub is_estimating: bool,
    /// Running completion fraction of the whole scheduled batch
    pub total_progress: f64,
}

impl OpProgress {
    pub fn new(op: impl Into<OpId>, status: &str, is_estimating: bool, total_progress: f64) -> Self {
        Self {
            op: op.into(),
            status: status.to_string(),
            is_estimating,
            total_progress,
        }
    }
}

/// Events flowing from the backend to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    Op(Op),
    Progress(OpProgress),
}

impl From<Op> for BackendEvent {
    fn from(op: Op) -> Self {
        Self::Op(op)
    }
}

impl From<OpProgress> for BackendEvent {
    fn from(progress: OpProgress) -> Self {
        Self::Progress(progress)
    }
}

/// Sending half of the event channel handed to the backend
pub type EventSender = mpsc::Sender<BackendEvent>;

/// The package-management implementation behind the engine
#[async_trait]
pub trait Backend: Send + Sync {
    /// Merge the given transactions and run them
    ///
    /// Implementations report progress through `events` and should stop
    /// issuing events once `cancel` fires. The channel closes when `events`
    /// is dropped; that must happen exactly once, at the latest when this
    /// future completes.
    async fn merge_and_schedule(
        &self,
        transactions: &[Transaction],
        events: EventSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}
