//! finledger-admin: maintenance commands for FinLedger projectors.
//!
//! ```text
//! finledger-admin migrate
//! finledger-admin run --account 42 --projector all
//! finledger-admin reset --account 42 --projector wallet_balances
//! finledger-admin rebuild --account 42 --projector xp
//! finledger-admin checkpoint --account 42
//! ```
//!
//! Connection settings come from the environment, see
//! [`LedgerConfig`](finledger_postgres::LedgerConfig).

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use finledger_core::engine::{ProjectionRunner, ProjectorOrchestrator};
use finledger_core::event::AccountId;
use finledger_postgres::{LedgerConfig, PostgresEventStore, PostgresProjectionBackend};
use finledger_projections::{Ledger, PROJECTOR_NAMES};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "finledger-admin")]
#[command(about = "Run, reset and inspect FinLedger projectors")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Catch projectors up with the event log
    Run(Target),
    /// Rewind checkpoints; read models stay and the next run replays over them
    Reset(Target),
    /// Reset, then replay the whole log
    Rebuild(Target),
    /// Print checkpoints
    Checkpoint(Target),
}

#[derive(Args, Debug)]
struct Target {
    /// Account to operate on
    #[arg(long, env = "FINLEDGER_ACCOUNT_ID")]
    account: i64,

    /// Projector name, or `all`
    #[arg(long, default_value = "all")]
    projector: String,
}

impl Target {
    fn account_id(&self) -> anyhow::Result<AccountId> {
        if self.account <= 0 {
            bail!("account must be positive, got {}", self.account);
        }
        Ok(AccountId::new(self.account))
    }

    fn runners(&self, orchestrator: &ProjectorOrchestrator) -> anyhow::Result<Vec<Arc<dyn ProjectionRunner>>> {
        let names: Vec<&str> = if self.projector == "all" {
            PROJECTOR_NAMES.to_vec()
        } else {
            vec![self.projector.as_str()]
        };

        names
            .into_iter()
            .map(|name| {
                orchestrator.get(name).with_context(|| {
                    format!(
                        "unknown projector '{name}', expected one of: all, {}",
                        PROJECTOR_NAMES.join(", ")
                    )
                })
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("finledger=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = LedgerConfig::from_env()?;
    let pool = config.connect().await?;

    if matches!(cli.command, Command::Migrate) {
        finledger_postgres::migrate(&pool).await?;
        return Ok(());
    }

    let ledger = Ledger::with_config(
        Arc::new(PostgresEventStore::new(pool.clone())),
        PostgresProjectionBackend::new(pool),
        config.engine_config(),
    );
    let orchestrator = ledger.orchestrator();

    match cli.command {
        Command::Migrate => {}
        Command::Run(target) => {
            let account_id = target.account_id()?;
            for runner in target.runners(&orchestrator)? {
                let applied = runner.run_account(account_id, None).await?;
                info!(projector = runner.projector_name(), account_id = %account_id, applied, "Caught up");
                println!("{}: applied {applied}", runner.projector_name());
            }
        }
        Command::Reset(target) => {
            let account_id = target.account_id()?;
            for runner in target.runners(&orchestrator)? {
                runner.reset_account(account_id).await?;
                println!("{}: reset", runner.projector_name());
            }
        }
        Command::Rebuild(target) => {
            let account_id = target.account_id()?;
            for runner in target.runners(&orchestrator)? {
                let applied = runner.rebuild_account(account_id).await?;
                println!("{}: rebuilt from {applied} events", runner.projector_name());
            }
        }
        Command::Checkpoint(target) => {
            let account_id = target.account_id()?;
            for runner in target.runners(&orchestrator)? {
                let checkpoint = runner.checkpoint_of(account_id).await?;
                println!("{}: {checkpoint}", runner.projector_name());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests can unwrap
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn reset_help_says_rows_are_kept() {
        let command = Cli::command();
        let about = command
            .find_subcommand("reset")
            .and_then(|reset| reset.get_about())
            .unwrap()
            .to_string();
        assert!(about.starts_with("Rewind checkpoints"));
        assert!(about.contains("read models stay"));
    }

    #[test]
    fn projector_defaults_to_all() {
        let cli = Cli::try_parse_from(["finledger-admin", "run", "--account", "7"]).unwrap();
        let Command::Run(target) = cli.command else {
            unreachable!("parsed a run command");
        };
        assert_eq!(target.account, 7);
        assert_eq!(target.projector, "all");
    }

    #[test]
    fn named_projector() {
        let cli = Cli::try_parse_from([
            "finledger-admin",
            "rebuild",
            "--account",
            "3",
            "--projector",
            "xp",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Rebuild(Target { ref projector, .. }) if projector == "xp"));
    }

    #[test]
    fn rejects_non_positive_account() {
        let target = Target {
            account: 0,
            projector: "all".to_string(),
        };
        assert!(target.account_id().is_err());
    }

    #[test]
    fn resolves_projector_names() {
        let orchestrator = ProjectorOrchestrator::new();
        let target = Target {
            account: 1,
            projector: "nope".to_string(),
        };
        let error = target.runners(&orchestrator).err().unwrap();
        assert!(error.to_string().contains("unknown projector 'nope'"));
    }
}
