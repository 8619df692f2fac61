// src/error.rs

//! Error types for the transaction engine
//!
//! Two layers:
//! - [`Error`]: crate-level failures (loading hook files, I/O, invalid definitions)
//! - [`TransactionError`]: the outcome delivered to every caller waiting on a
//!   transaction. It is `Clone` because one entry may carry several callers
//!   once their requests have been merged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse hook definitions: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid hook definition: {0}")]
    InvalidHook(String),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Why a transaction did not complete successfully
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionError {
    /// Cancelled through `cancel_current()`
    #[error("Transaction was cancelled")]
    Cancelled,

    /// A `before-transaction` hook answered `deny`
    #[error("Transaction was cancelled by hook '{hook_id}'")]
    DeniedByHook { hook_id: String },

    /// The backend's scheduling call failed
    #[error("Backend failure: {message}")]
    Backend { message: String },

    /// The manager was shut down before the transaction could finish
    #[error("Transaction manager is shutting down")]
    Shutdown,
}

impl TransactionError {
    /// Cancellation and shutdown are not failures of the transaction itself
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Shutdown)
    }
}

/// Errors escaping a hook emission
///
/// Infrastructure problems (spawn failures, bad exit codes, garbage output)
/// never surface here; those fail open inside the runner.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("Hook '{hook_id}' denied the operation")]
    Denied { hook_id: String },
}

impl From<HookError> for TransactionError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Denied { hook_id } => Self::DeniedByHook { hook_id },
        }
    }
}
