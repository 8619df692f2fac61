// src/main.rs

use anyhow::{Result, bail};
use bazaar::confirm::{Confirmer, HeadlessConfirmer, PromptConfirmer};
use bazaar::hooks::{EmissionOutcome, HookConfig, HookContext, HookRunner, HookSignal};
use bazaar::{HookError, HookRunnerConfig, TransactionKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "bazaar-hooks")]
#[command(author, version, about = "Validate and exercise Bazaar transaction hooks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a hooks file
    Check {
        /// Path to the hooks YAML file
        file: PathBuf,

        /// Print the parsed hooks as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one hook emission and print its outcome
    Emit {
        /// Path to the hooks YAML file
        file: PathBuf,

        /// Signal to emit (before-transaction, after-transaction, view-app, ...)
        #[arg(long)]
        signal: HookSignal,

        /// App id for non-transaction signals
        #[arg(long, conflicts_with_all = ["transaction_kind", "package"])]
        app_id: Option<String>,

        /// Transaction kind (install, update, removal)
        #[arg(long, requires = "package")]
        transaction_kind: Option<TransactionKind>,

        /// Package affected by the transaction
        #[arg(long, requires = "transaction_kind")]
        package: Option<String>,

        /// Answer every dialog with its default response
        #[arg(long)]
        non_interactive: bool,

        /// Shell used to run hook bodies
        #[arg(long, default_value = "/bin/sh")]
        shell: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file, json } => {
            let config = HookConfig::load(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }
            println!("{}: {} hook(s) OK", file.display(), config.len());
            for hook in &config.hooks {
                println!(
                    "  {} (when: {}, {} dialog(s))",
                    hook.id,
                    hook.when,
                    hook.dialogs.len()
                );
            }
            Ok(())
        }
        Commands::Emit {
            file,
            signal,
            app_id,
            transaction_kind,
            package,
            non_interactive,
            shell,
        } => {
            let context = match (app_id, transaction_kind, package) {
                (Some(app_id), _, _) => HookContext::app(app_id),
                (None, Some(kind), Some(package)) => HookContext::transaction(kind, package),
                _ => bail!("either --app-id or --transaction-kind with --package is required"),
            };

            let hooks = HookConfig::load(&file)?;
            let confirmer: Arc<dyn Confirmer> = if non_interactive {
                Arc::new(HeadlessConfirmer)
            } else {
                Arc::new(PromptConfirmer::new())
            };
            let runner = HookRunner::new(hooks, HookRunnerConfig::default().with_shell(shell), confirmer);

            info!("Emitting {} for {}", signal, context.app_id());
            match runner.emit(&signal, &context).await {
                Ok(EmissionOutcome::Completed) => println!("continue"),
                Ok(EmissionOutcome::Stopped { hook_id }) => println!("stop (by '{}')", hook_id),
                Ok(EmissionOutcome::Confirmed { hook_id }) => println!("confirm (by '{}')", hook_id),
                Err(HookError::Denied { hook_id }) => {
                    println!("deny (by '{}')", hook_id);
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}
