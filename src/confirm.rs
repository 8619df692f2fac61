// src/confirm.rs

//! Presenting hook dialogs to the user
//!
//! The engine never talks to widgets. Whatever front end is running
//! implements [`Confirmer`]; the hook runner awaits its answer. When there is
//! no way to ask (headless runs) or the presentation fails, the runner falls
//! back to the dialog's default response.

use crate::hooks::{DialogOptionStyle, Hook, HookDialog};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use thiserror::Error;

/// Why a dialog could not produce a response
#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("No window available to present dialog '{0}'")]
    NoWindow(String),

    #[error("Failed to read response: {0}")]
    Io(#[from] io::Error),

    #[error("Response '{0}' is not an option of this dialog")]
    InvalidChoice(String),

    #[error("Dialog presentation was interrupted")]
    Interrupted,
}

/// Something that can show a hook dialog and wait for the user's choice
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Show `dialog` for `hook`, returning the chosen option id
    async fn present(&self, hook: &Hook, dialog: &HookDialog) -> Result<String, ConfirmError>;
}

/// Confirmer for runs without any UI; every dialog uses its default response
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessConfirmer;

#[async_trait]
impl Confirmer for HeadlessConfirmer {
    async fn present(&self, _hook: &Hook, dialog: &HookDialog) -> Result<String, ConfirmError> {
        Err(ConfirmError::NoWindow(dialog.id.clone()))
    }
}

/// Answers dialogs from a fixed table (dialog id -> response id)
///
/// Useful for scripted runs and tests. Dialogs missing from the table
/// behave as if no window were available.
#[derive(Debug, Default, Clone)]
pub struct FixedConfirmer {
    responses: HashMap<String, String>,
}

impl FixedConfirmer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer dialog `dialog_id` with `response_id`
    pub fn with_response(mut self, dialog_id: impl Into<String>, response_id: impl Into<String>) -> Self {
        self.responses.insert(dialog_id.into(), response_id.into());
        self
    }
}

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn present(&self, _hook: &Hook, dialog: &HookDialog) -> Result<String, ConfirmError> {
        self.responses
            .get(&dialog.id)
            .cloned()
            .ok_or_else(|| ConfirmError::NoWindow(dialog.id.clone()))
    }
}

/// Terminal confirmer: prints the dialog and reads a choice from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptConfirmer;

impl PromptConfirmer {
    pub fn new() -> Self {
        Self
    }

    fn render(hook: &Hook, dialog: &HookDialog) -> io::Result<()> {
        let mut stdout = io::stdout();

        writeln!(stdout)?;
        writeln!(stdout, "=== {} ===", dialog.title)?;
        writeln!(stdout, "  (requested by hook '{}')", hook.id)?;
        if !dialog.body.is_empty() {
            writeln!(stdout)?;
            for line in dialog.body.lines() {
                writeln!(stdout, "  {}", line)?;
            }
        }
        writeln!(stdout)?;

        for (idx, option) in dialog.options.iter().enumerate() {
            let marker = match option.style {
                DialogOptionStyle::Suggested => " (suggested)",
                DialogOptionStyle::Destructive => " (!)",
                DialogOptionStyle::Default => "",
            };
            let default = if option.id == dialog.default_response_id {
                " [default]"
            } else {
                ""
            };
            writeln!(stdout, "  [{}] {}{}{}", idx + 1, option.label, marker, default)?;
        }

        writeln!(stdout)?;
        write!(stdout, "Choice: ")?;
        stdout.flush()
    }

    /// Map typed input to an option id; empty input picks the default
    fn parse_choice(dialog: &HookDialog, input: &str) -> Result<String, ConfirmError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(dialog.default_response_id.clone());
        }

        if let Ok(n) = input.parse::<usize>()
            && n >= 1
            && let Some(option) = dialog.options.get(n - 1)
        {
            return Ok(option.id.clone());
        }

        dialog
            .options
            .iter()
            .find(|o| o.id.eq_ignore_ascii_case(input) || o.label.eq_ignore_ascii_case(input))
            .map(|o| o.id.clone())
            .ok_or_else(|| ConfirmError::InvalidChoice(input.to_string()))
    }
}

#[async_trait]
impl Confirmer for PromptConfirmer {
    async fn present(&self, hook: &Hook, dialog: &HookDialog) -> Result<String, ConfirmError> {
        let hook = hook.clone();
        let dialog = dialog.clone();

        tokio::task::spawn_blocking(move || {
            Self::render(&hook, &dialog)?;
            let mut input = String::new();
            io::stdin().lock().read_line(&mut input)?;
            Self::parse_choice(&dialog, &input)
        })
        .await
        .map_err(|_| ConfirmError::Interrupted)?
    }
}
