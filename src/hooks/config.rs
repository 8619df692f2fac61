// src/hooks/config.rs

//! Loading hook definitions from YAML
//!
//! ```yaml
//! hooks:
//!   - id: parental-controls
//!     when: before-transaction
//!     shell: /usr/libexec/parental-check
//!     dialogs:
//!       - id: ask
//!         title: Install this app?
//!         default-response-id: no
//!         options:
//!           - { id: yes, label: Install, style: suggested }
//!           - { id: no, label: Cancel }
//! ```

use super::{Hook, HookSignal};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// A validated set of hooks, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub hooks: Vec<Hook>,
}

impl HookConfig {
    /// Load and validate a hooks file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        debug!("Loaded {} hook(s) from {}", config.hooks.len(), path.display());
        Ok(config)
    }

    /// Parse and validate hooks from a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: HookConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ids and dialog defaults
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for hook in &self.hooks {
            if hook.id.trim().is_empty() {
                return Err(Error::InvalidHook("hook with empty id".to_string()));
            }
            if !seen.insert(hook.id.as_str()) {
                return Err(Error::InvalidHook(format!("duplicate hook id '{}'", hook.id)));
            }
            if hook.shell.trim().is_empty() {
                return Err(Error::InvalidHook(format!("hook '{}' has an empty shell body", hook.id)));
            }

            let mut dialog_ids = HashSet::new();
            for dialog in &hook.dialogs {
                if !dialog_ids.insert(dialog.id.as_str()) {
                    return Err(Error::InvalidHook(format!(
                        "hook '{}' has duplicate dialog id '{}'",
                        hook.id, dialog.id
                    )));
                }
                if !dialog.options.is_empty()
                    && !dialog.options.iter().any(|o| o.id == dialog.default_response_id)
                {
                    return Err(Error::InvalidHook(format!(
                        "dialog '{}' of hook '{}' defaults to unknown option '{}'",
                        dialog.id, hook.id, dialog.default_response_id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Hooks listening for `signal`, in configuration order
    pub fn matching<'a>(&'a self, signal: &'a HookSignal) -> impl Iterator<Item = &'a Hook> + 'a {
        self.hooks.iter().filter(move |hook| &hook.when == signal)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
