// src/lib.rs

//! Bazaar transaction engine
//!
//! Schedules package install/update/removal transactions against an external
//! backend and lets user-configured shell hooks intercept them.
//!
//! # Architecture
//!
//! - Single-flight: at most one transaction runs at a time
//! - Coalescing: requests made while something runs merge into one follow-up
//! - Hooks: multi-stage subprocess protocol, fail-open on every error
//! - Injected collaborators: the [`backend::Backend`] does the actual work and
//!   a [`confirm::Confirmer`] presents hook dialogs

pub mod backend;
pub mod config;
pub mod confirm;
mod error;
pub mod hooks;
pub mod manager;
pub mod progress;
pub mod transaction;

pub use backend::{Backend, BackendEvent, Op, OpId, OpProgress, OpStatus};
pub use config::{HookRunnerConfig, ManagerConfig};
pub use error::{Error, HookError, Result, TransactionError};
pub use hooks::{HookConfig, HookContext, HookResult, HookRunner, HookSignal};
pub use manager::{CompletionHandle, ManagerEvent, ManagerSnapshot, TransactionManager};
pub use progress::ProgressAggregator;
pub use transaction::{Transaction, TransactionKind, TransactionRequest, TransactionTask};
