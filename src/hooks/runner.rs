// src/hooks/runner.rs

//! Hook execution
//!
//! Runs one hook as a sequence of `<shell> -c <body>` spawns. Each spawn is a
//! stage; the first line of its stdout picks the next stage:
//!
//! | Stage             | Output             | Effect                                   |
//! |-------------------|--------------------|------------------------------------------|
//! | `setup`           | `ok` / `pass`      | proceed / skip hook (CONTINUE)           |
//! | `setup-dialog`    | `ok` / `pass`      | present the dialog / drop it             |
//! | `teardown-dialog` | `ok` / `abort`     | proceed / mark the hook aborted          |
//! | `catch`           | `recover` / `abort`| clear the abort / go to teardown         |
//! | `action`          | anything           | go to teardown                           |
//! | `teardown`        | `continue` `stop` `confirm` `deny` | final answer             |
//!
//! Every failure along the way (spawn error, non-zero exit, non-UTF-8 output,
//! unknown token) ends the hook with CONTINUE and a warning. A broken hook
//! must never block package management.
//!
//! Everything a hook learns about its invocation arrives through environment
//! variables (see the `ENV_*` constants).

use super::{Hook, HookConfig, HookContext, HookDialog, HookResult, HookSignal, HookStage};
use crate::config::HookRunnerConfig;
use crate::confirm::Confirmer;
use crate::error::HookError;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const ENV_INITIATED_UNIX_STAMP: &str = "BAZAAR_HOOK_INITIATED_UNIX_STAMP";
pub const ENV_INITIATED_UNIX_STAMP_USEC: &str = "BAZAAR_HOOK_INITIATED_UNIX_STAMP_USEC";
pub const ENV_STAGE_IDX: &str = "BAZAAR_HOOK_STAGE_IDX";
pub const ENV_HOOK_ID: &str = "BAZAAR_HOOK_ID";
pub const ENV_HOOK_TYPE: &str = "BAZAAR_HOOK_TYPE";
pub const ENV_WAS_ABORTED: &str = "BAZAAR_HOOK_WAS_ABORTED";
pub const ENV_STAGE: &str = "BAZAAR_HOOK_STAGE";
pub const ENV_DIALOG_ID: &str = "BAZAAR_HOOK_DIALOG_ID";
pub const ENV_DIALOG_RESPONSE_ID: &str = "BAZAAR_HOOK_DIALOG_RESPONSE_ID";
pub const ENV_TS_APPID: &str = "BAZAAR_TS_APPID";
pub const ENV_TS_TYPE: &str = "BAZAAR_TS_TYPE";
pub const ENV_APPID: &str = "BAZAAR_APPID";

/// How an emission ended when nobody denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmissionOutcome {
    /// Every matching hook answered CONTINUE (or there were none)
    Completed,
    /// A hook answered STOP; later hooks were skipped
    Stopped { hook_id: String },
    /// A hook answered CONFIRM; later hooks were skipped
    Confirmed { hook_id: String },
}

/// Per-invocation data shared by every stage of one hook run
struct Invocation<'a> {
    hook: &'a Hook,
    signal: &'a HookSignal,
    context: &'a HookContext,
    initiated_secs: u64,
    initiated_usecs: u128,
}

/// Dialog information attached to a stage
#[derive(Clone, Copy)]
struct DialogEnv<'a> {
    dialog_id: &'a str,
    response_id: Option<&'a str>,
}

/// Executes hooks and hook emissions
pub struct HookRunner {
    hooks: HookConfig,
    config: HookRunnerConfig,
    confirmer: Arc<dyn Confirmer>,
}

impl HookRunner {
    /// Create a runner over a validated set of hooks
    pub fn new(hooks: HookConfig, config: HookRunnerConfig, confirmer: Arc<dyn Confirmer>) -> Self {
        Self {
            hooks,
            config,
            confirmer,
        }
    }

    /// The hooks this runner emits to
    pub fn hooks(&self) -> &HookConfig {
        &self.hooks
    }

    /// Run every hook listening for `signal`, in configuration order
    ///
    /// STOP and CONFIRM end the emission early and successfully. DENY ends
    /// it with [`HookError::Denied`].
    pub async fn emit(&self, signal: &HookSignal, context: &HookContext) -> Result<EmissionOutcome, HookError> {
        for hook in self.hooks.matching(signal) {
            let result = self.run_hook(hook, signal, context).await;
            debug!("Hook '{}' answered {} for {}", hook.id, result, context.app_id());

            match result {
                HookResult::Continue => continue,
                HookResult::Stop => {
                    return Ok(EmissionOutcome::Stopped {
                        hook_id: hook.id.clone(),
                    });
                }
                HookResult::Confirm => {
                    return Ok(EmissionOutcome::Confirmed {
                        hook_id: hook.id.clone(),
                    });
                }
                HookResult::Deny => {
                    info!("Hook '{}' denied {} for {}", hook.id, signal, context.app_id());
                    return Err(HookError::Denied {
                        hook_id: hook.id.clone(),
                    });
                }
            }
        }

        Ok(EmissionOutcome::Completed)
    }

    /// Run a single hook through its stages
    pub async fn run_hook(&self, hook: &Hook, signal: &HookSignal, context: &HookContext) -> HookResult {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let invocation = Invocation {
            hook,
            signal,
            context,
            initiated_secs: now.as_secs(),
            initiated_usecs: now.as_micros(),
        };

        let mut dialogs: VecDeque<&HookDialog> = hook.dialogs.iter().collect();
        let mut stage_idx: u32 = 0;
        let mut aborted = false;
        let mut finish = false;

        macro_rules! stage {
            ($stage:expr, $dialog:expr) => {{
                let output = self
                    .spawn_stage(&invocation, $stage, stage_idx, aborted, $dialog)
                    .await;
                stage_idx += 1;
                match output {
                    Some(output) => output,
                    None => return HookResult::Continue,
                }
            }};
        }

        match stage!(HookStage::Setup, None).as_str() {
            "ok" => {}
            "pass" => return HookResult::Continue,
            other => return Self::unrecognized(hook, HookStage::Setup, other),
        }

        loop {
            if finish {
                let output = stage!(HookStage::Teardown, None);
                return match output.parse::<HookResult>() {
                    Ok(result) => result,
                    Err(_) => Self::unrecognized(hook, HookStage::Teardown, &output),
                };
            }

            if aborted {
                match stage!(HookStage::Catch, None).as_str() {
                    "recover" => aborted = false,
                    "abort" => finish = true,
                    other => return Self::unrecognized(hook, HookStage::Catch, other),
                }
                continue;
            }

            let Some(dialog) = dialogs.pop_front() else {
                // No dialogs left: the action stage runs once, its output is informational
                let output = stage!(HookStage::Action, None);
                debug!("Hook '{}' action printed '{}'", hook.id, output);
                finish = true;
                continue;
            };

            let setup_env = DialogEnv {
                dialog_id: &dialog.id,
                response_id: None,
            };
            match stage!(HookStage::SetupDialog, Some(setup_env)).as_str() {
                "ok" => {}
                "pass" => continue,
                other => return Self::unrecognized(hook, HookStage::SetupDialog, other),
            }

            let response = self.resolve_dialog(hook, dialog).await;
            let teardown_env = DialogEnv {
                dialog_id: &dialog.id,
                response_id: Some(&response),
            };
            match stage!(HookStage::TeardownDialog, Some(teardown_env)).as_str() {
                "ok" => {}
                "abort" => aborted = true,
                other => return Self::unrecognized(hook, HookStage::TeardownDialog, other),
            }
        }
    }

    /// Ask the confirmer, falling back to the dialog's default response
    async fn resolve_dialog(&self, hook: &Hook, dialog: &HookDialog) -> String {
        match self.confirmer.present(hook, dialog).await {
            Ok(response)
                if dialog.options.is_empty() || dialog.options.iter().any(|o| o.id == response) =>
            {
                response
            }
            Ok(response) => {
                warn!(
                    "Dialog '{}' of hook '{}' returned unknown response '{}', using default '{}'",
                    dialog.id, hook.id, response, dialog.default_response_id
                );
                dialog.default_response_id.clone()
            }
            Err(e) => {
                warn!(
                    "Could not present dialog '{}' of hook '{}': {}; using default '{}'",
                    dialog.id, hook.id, e, dialog.default_response_id
                );
                dialog.default_response_id.clone()
            }
        }
    }

    fn unrecognized(hook: &Hook, stage: HookStage, output: &str) -> HookResult {
        warn!(
            "Hook '{}' printed unrecognized '{}' during {} stage; continuing",
            hook.id, output, stage
        );
        HookResult::Continue
    }

    /// Spawn one stage and return the trimmed first line of stdout
    ///
    /// `None` means the stage failed and the hook should fail open.
    async fn spawn_stage(
        &self,
        invocation: &Invocation<'_>,
        stage: HookStage,
        stage_idx: u32,
        aborted: bool,
        dialog: Option<DialogEnv<'_>>,
    ) -> Option<String> {
        let hook = invocation.hook;
        debug!("Running hook '{}' stage {} (#{})", hook.id, stage, stage_idx);

        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(&hook.shell)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(ENV_INITIATED_UNIX_STAMP, invocation.initiated_secs.to_string())
            .env(ENV_INITIATED_UNIX_STAMP_USEC, invocation.initiated_usecs.to_string())
            .env(ENV_STAGE_IDX, stage_idx.to_string())
            .env(ENV_HOOK_ID, &hook.id)
            .env(ENV_HOOK_TYPE, invocation.signal.as_str())
            .env(ENV_WAS_ABORTED, if aborted { "true" } else { "false" })
            .env(ENV_STAGE, stage.as_ref());

        match invocation.context {
            HookContext::Transaction { kind, app_id } => {
                command.env(ENV_TS_APPID, app_id).env(ENV_TS_TYPE, kind.as_ref());
            }
            HookContext::App { app_id } => {
                command.env(ENV_APPID, app_id);
            }
        }

        if let Some(dialog) = dialog {
            command.env(ENV_DIALOG_ID, dialog.dialog_id);
            if let Some(response_id) = dialog.response_id {
                command.env(ENV_DIALOG_RESPONSE_ID, response_id);
            }
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to spawn hook '{}' for {} stage: {}", hook.id, stage, e);
                return None;
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Hook '{}' stderr: {}", hook.id, stderr.trim());
        }

        if !output.status.success() {
            warn!(
                "Hook '{}' exited with {} during {} stage; continuing",
                hook.id, output.status, stage
            );
            return None;
        }

        let stdout = match String::from_utf8(output.stdout) {
            Ok(stdout) => stdout,
            Err(e) => {
                warn!("Hook '{}' wrote unreadable output during {} stage: {}", hook.id, stage, e);
                return None;
            }
        };

        Some(stdout.lines().next().unwrap_or("").trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{FixedConfirmer, HeadlessConfirmer};
    use crate::hooks::{DialogOptionStyle, HookDialogOption};
    use crate::transaction::TransactionKind;
    use std::path::Path;
    use tempfile::TempDir;

    fn runner_with(hooks: Vec<Hook>, dir: &Path, confirmer: Arc<dyn Confirmer>) -> HookRunner {
        HookRunner::new(
            HookConfig { hooks },
            HookRunnerConfig::default().with_working_dir(dir),
            confirmer,
        )
    }

    fn hook(id: &str, when: HookSignal, shell: &str) -> Hook {
        Hook {
            id: id.to_string(),
            when,
            shell: shell.to_string(),
            dialogs: Vec::new(),
        }
    }

    fn ask_dialog() -> HookDialog {
        HookDialog {
            id: "ask".to_string(),
            title: "Install?".to_string(),
            body: String::new(),
            default_response_id: "no".to_string(),
            options: vec![
                HookDialogOption {
                    id: "yes".to_string(),
                    label: "Yes".to_string(),
                    style: DialogOptionStyle::Suggested,
                },
                HookDialogOption {
                    id: "no".to_string(),
                    label: "No".to_string(),
                    style: DialogOptionStyle::Destructive,
                },
            ],
        }
    }

    /// Script that logs every stage and answers like a simple gatekeeper
    fn gatekeeper_script(log: &Path) -> String {
        format!(
            r#"echo "$BAZAAR_HOOK_STAGE_IDX:$BAZAAR_HOOK_STAGE:$BAZAAR_HOOK_WAS_ABORTED:$BAZAAR_HOOK_DIALOG_RESPONSE_ID" >> "{log}"
case "$BAZAAR_HOOK_STAGE" in
  setup) echo ok ;;
  setup-dialog) echo ok ;;
  teardown-dialog)
    if [ "$BAZAAR_HOOK_DIALOG_RESPONSE_ID" = "yes" ]; then echo ok; else echo abort; fi ;;
  catch) echo abort ;;
  action) echo done ;;
  teardown)
    if [ "$BAZAAR_HOOK_WAS_ABORTED" = "true" ]; then echo deny; else echo confirm; fi ;;
esac
"#,
            log = log.display()
        )
    }

    fn read_log(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_dialog_approved_confirms() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("stages.log");
        let mut gate = hook("gate", HookSignal::BeforeTransaction, &gatekeeper_script(&log));
        gate.dialogs.push(ask_dialog());

        let runner = runner_with(
            vec![gate.clone()],
            tmp.path(),
            Arc::new(FixedConfirmer::new().with_response("ask", "yes")),
        );

        let context = HookContext::transaction(TransactionKind::Install, "org.app.A");
        let result = runner.run_hook(&gate, &HookSignal::BeforeTransaction, &context).await;
        assert_eq!(result, HookResult::Confirm);

        assert_eq!(
            read_log(&log),
            vec![
                "0:setup:false:",
                "1:setup-dialog:false:",
                "2:teardown-dialog:false:yes",
                "3:action:false:",
                "4:teardown:false:",
            ]
        );
    }

    #[tokio::test]
    async fn test_headless_dialog_uses_default_and_denies() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("stages.log");
        let mut gate = hook("gate", HookSignal::BeforeTransaction, &gatekeeper_script(&log));
        gate.dialogs.push(ask_dialog());

        let runner = runner_with(vec![gate.clone()], tmp.path(), Arc::new(HeadlessConfirmer));

        let context = HookContext::transaction(TransactionKind::Install, "org.app.A");
        let result = runner.run_hook(&gate, &HookSignal::BeforeTransaction, &context).await;
        assert_eq!(result, HookResult::Deny);

        // Default response "no" -> abort -> catch abort -> teardown with aborted flag
        assert_eq!(
            read_log(&log),
            vec![
                "0:setup:false:",
                "1:setup-dialog:false:",
                "2:teardown-dialog:false:no",
                "3:catch:true:",
                "4:teardown:true:",
            ]
        );
    }

    #[tokio::test]
    async fn test_catch_recover_continues_with_next_dialog() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("stages.log");
        let script = format!(
            r#"echo "$BAZAAR_HOOK_STAGE:$BAZAAR_HOOK_DIALOG_ID" >> "{log}"
case "$BAZAAR_HOOK_STAGE" in
  setup|setup-dialog) echo ok ;;
  teardown-dialog) if [ "$BAZAAR_HOOK_DIALOG_ID" = "first" ]; then echo abort; else echo ok; fi ;;
  catch) echo recover ;;
  action) echo ran ;;
  teardown) if [ "$BAZAAR_HOOK_WAS_ABORTED" = "true" ]; then echo deny; else echo stop; fi ;;
esac
"#,
            log = log.display()
        );
        let mut first = ask_dialog();
        first.id = "first".to_string();
        let mut second = ask_dialog();
        second.id = "second".to_string();
        let mut h = hook("h", HookSignal::BeforeTransaction, &script);
        h.dialogs = vec![first, second];

        let runner = runner_with(vec![h.clone()], tmp.path(), Arc::new(HeadlessConfirmer));
        let result = runner
            .run_hook(
                &h,
                &HookSignal::BeforeTransaction,
                &HookContext::transaction(TransactionKind::Update, "org.app.B"),
            )
            .await;

        assert_eq!(result, HookResult::Stop);
        assert_eq!(
            read_log(&log),
            vec![
                "setup:",
                "setup-dialog:first",
                "teardown-dialog:first",
                "catch:",
                "setup-dialog:second",
                "teardown-dialog:second",
                "action:",
                "teardown:",
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_dialog_pass_skips_dialog() {
        let tmp = TempDir::new().unwrap();
        let script = r#"case "$BAZAAR_HOOK_STAGE" in
  setup) echo ok ;;
  setup-dialog) echo pass ;;
  teardown-dialog) exit 3 ;;
  action) echo ok ;;
  teardown) echo confirm ;;
esac
"#;
        let mut h = hook("h", HookSignal::BeforeTransaction, script);
        h.dialogs.push(ask_dialog());

        let runner = runner_with(vec![h.clone()], tmp.path(), Arc::new(HeadlessConfirmer));
        let result = runner
            .run_hook(&h, &HookSignal::BeforeTransaction, &HookContext::app("org.app.C"))
            .await;
        assert_eq!(result, HookResult::Confirm);
    }

    #[tokio::test]
    async fn test_setup_pass_continues_without_more_stages() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("stages.log");
        let script = format!(
            "echo \"$BAZAAR_HOOK_STAGE\" >> \"{}\"\necho pass\n",
            log.display()
        );
        let h = hook("h", HookSignal::ViewApp, &script);

        let runner = runner_with(vec![h.clone()], tmp.path(), Arc::new(HeadlessConfirmer));
        let result = runner
            .run_hook(&h, &HookSignal::ViewApp, &HookContext::app("org.app.A"))
            .await;

        assert_eq!(result, HookResult::Continue);
        assert_eq!(read_log(&log), vec!["setup"]);
    }

    #[tokio::test]
    async fn test_fail_open_cases() {
        let tmp = TempDir::new().unwrap();
        let context = HookContext::app("org.app.A");
        let cases = [
            ("exit 1", "non-zero exit"),
            ("echo maybe", "unrecognized setup token"),
            (
                r#"case "$BAZAAR_HOOK_STAGE" in setup) echo ok ;; action) echo x ;; teardown) echo perhaps ;; esac"#,
                "unrecognized teardown token",
            ),
            (r#"printf '\377\376\n'"#, "non-UTF-8 output"),
            ("true", "empty output"),
        ];

        for (script, label) in cases {
            let h = hook("broken", HookSignal::ViewApp, script);
            let runner = runner_with(vec![h.clone()], tmp.path(), Arc::new(HeadlessConfirmer));
            let result = runner.run_hook(&h, &HookSignal::ViewApp, &context).await;
            assert_eq!(result, HookResult::Continue, "case: {}", label);
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_fails_open() {
        let tmp = TempDir::new().unwrap();
        let h = hook("h", HookSignal::ViewApp, "echo deny");
        let runner = HookRunner::new(
            HookConfig { hooks: vec![h.clone()] },
            HookRunnerConfig::default()
                .with_shell("/nonexistent/shell")
                .with_working_dir(tmp.path()),
            Arc::new(HeadlessConfirmer),
        );

        let result = runner
            .run_hook(&h, &HookSignal::ViewApp, &HookContext::app("org.app.A"))
            .await;
        assert_eq!(result, HookResult::Continue);
    }

    #[tokio::test]
    async fn test_environment_for_transaction_and_app_contexts() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("env.log");
        let script = format!(
            r#"echo "$BAZAAR_HOOK_ID|$BAZAAR_HOOK_TYPE|$BAZAAR_TS_APPID|$BAZAAR_TS_TYPE|$BAZAAR_APPID|$(pwd -P)" >> "{}"
[ -n "$BAZAAR_HOOK_INITIATED_UNIX_STAMP" ] && [ -n "$BAZAAR_HOOK_INITIATED_UNIX_STAMP_USEC" ] || exit 9
echo pass
"#,
            log.display()
        );
        let h = hook("env-check", HookSignal::BeforeTransaction, &script);
        let runner = runner_with(vec![h.clone()], tmp.path(), Arc::new(HeadlessConfirmer));

        runner
            .run_hook(
                &h,
                &HookSignal::BeforeTransaction,
                &HookContext::transaction(TransactionKind::Removal, "org.app.R"),
            )
            .await;
        runner
            .run_hook(&h, &HookSignal::ViewApp, &HookContext::app("org.app.V"))
            .await;

        let dir = tmp.path().canonicalize().unwrap();
        let lines = read_log(&log);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            format!("env-check|before-transaction|org.app.R|removal||{}", dir.display())
        );
        assert_eq!(
            lines[1],
            format!("env-check|view-app|||org.app.V|{}", dir.display())
        );
    }

    #[tokio::test]
    async fn test_emission_stop_skips_remaining_hooks() {
        let tmp = TempDir::new().unwrap();
        let marker = tmp.path().join("second-ran");
        let stopper = hook(
            "stopper",
            HookSignal::ViewApp,
            r#"case "$BAZAAR_HOOK_STAGE" in setup) echo ok ;; action) echo ok ;; teardown) echo stop ;; esac"#,
        );
        let second = hook(
            "second",
            HookSignal::ViewApp,
            &format!("touch \"{}\"; echo pass", marker.display()),
        );

        let runner = runner_with(vec![stopper, second], tmp.path(), Arc::new(HeadlessConfirmer));
        let outcome = runner
            .emit(&HookSignal::ViewApp, &HookContext::app("org.app.A"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EmissionOutcome::Stopped {
                hook_id: "stopper".to_string()
            }
        );
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_emission_broken_hook_does_not_affect_others() {
        let tmp = TempDir::new().unwrap();
        let broken = hook("broken", HookSignal::BeforeTransaction, "exit 1");
        let denier = hook(
            "denier",
            HookSignal::BeforeTransaction,
            r#"case "$BAZAAR_HOOK_STAGE" in setup) echo ok ;; action) echo ok ;; teardown) echo deny ;; esac"#,
        );
        let unrelated = hook("unrelated", HookSignal::AfterTransaction, "echo pass");

        let runner = runner_with(
            vec![unrelated, broken, denier],
            tmp.path(),
            Arc::new(HeadlessConfirmer),
        );
        let err = runner
            .emit(
                &HookSignal::BeforeTransaction,
                &HookContext::transaction(TransactionKind::Install, "org.app.A"),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            HookError::Denied {
                hook_id: "denier".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_emission_without_matching_hooks() {
        let tmp = TempDir::new().unwrap();
        let runner = runner_with(
            vec![hook("a", HookSignal::AfterTransaction, "echo deny")],
            tmp.path(),
            Arc::new(HeadlessConfirmer),
        );

        let outcome = runner
            .emit(&HookSignal::ViewApp, &HookContext::app("org.app.A"))
            .await
            .unwrap();
        assert_eq!(outcome, EmissionOutcome::Completed);
    }
}
