// src/hooks/mod.rs

//! Hooks: user-configured shell scripts that intercept operations
//!
//! A hook is attached to a signal (`before-transaction`, `after-transaction`,
//! `view-app`, ...). When the signal is emitted the hook runs as a sequence of
//! subprocess spawns, one per stage; each spawn prints a single token that
//! decides the next stage. Hooks can present dialogs to the user and finally
//! answer `continue`, `stop`, `confirm` or `deny`.
//!
//! # Stages
//!
//! ```text
//! setup -> [setup-dialog -> (dialog) -> teardown-dialog]* -> [catch] -> action -> teardown
//! ```
//!
//! Definitions are loaded once (see [`config`]) and never change afterwards.

pub mod config;
pub mod runner;

pub use config::HookConfig;
pub use runner::{EmissionOutcome, HookRunner};

use crate::transaction::TransactionKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signal a hook listens for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookSignal {
    BeforeTransaction,
    AfterTransaction,
    ViewApp,
    /// Any signal this engine does not emit itself
    Other(String),
}

impl HookSignal {
    /// Nick used in configuration files and `BAZAAR_HOOK_TYPE`
    pub fn as_str(&self) -> &str {
        match self {
            Self::BeforeTransaction => "before-transaction",
            Self::AfterTransaction => "after-transaction",
            Self::ViewApp => "view-app",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for HookSignal {
    fn from(s: String) -> Self {
        match s.as_str() {
            "before-transaction" => Self::BeforeTransaction,
            "after-transaction" => Self::AfterTransaction,
            "view-app" => Self::ViewApp,
            _ => Self::Other(s),
        }
    }
}

impl From<HookSignal> for String {
    fn from(signal: HookSignal) -> Self {
        signal.as_str().to_string()
    }
}

impl FromStr for HookSignal {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for HookSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One subprocess spawn of a hook
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum HookStage {
    Setup,
    SetupDialog,
    TeardownDialog,
    Catch,
    Action,
    Teardown,
}

/// Final answer of a hook
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HookResult {
    /// Carry on with the next hook
    Continue,
    /// Skip the remaining hooks of this emission
    Stop,
    /// Explicitly approve; skips the remaining hooks
    Confirm,
    /// Refuse the operation
    Deny,
}

/// Visual style of a dialog option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogOptionStyle {
    #[default]
    Default,
    Suggested,
    Destructive,
}

/// A button offered by a hook dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HookDialogOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub style: DialogOptionStyle,
}

/// A confirmation dialog a hook may present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HookDialog {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Response used when the dialog cannot be shown or fails
    pub default_response_id: String,
    #[serde(default)]
    pub options: Vec<HookDialogOption>,
}

/// A configured hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Hook {
    pub id: String,
    pub when: HookSignal,
    /// Script body, run as `<shell> -c <shell>`
    pub shell: String,
    #[serde(default)]
    pub dialogs: Vec<HookDialog>,
}

/// What an emission is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookContext {
    /// One package of a transaction
    Transaction { kind: TransactionKind, app_id: String },
    /// An app outside any transaction (e.g. `view-app`)
    App { app_id: String },
}

impl HookContext {
    pub fn transaction(kind: TransactionKind, app_id: impl Into<String>) -> Self {
        Self::Transaction {
            kind,
            app_id: app_id.into(),
        }
    }

    pub fn app(app_id: impl Into<String>) -> Self {
        Self::App {
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        match self {
            Self::Transaction { app_id, .. } | Self::App { app_id } => app_id,
        }
    }
}
