//! Operator CLI. Each subcommand runs once and exits, so cron or a CI
//! schedule can drive catalog maintenance.

use anyhow::Context;
use clap::{Parser, Subcommand};

use simbridge_api::app;
use simbridge_catalog::AuditFixes;
use simbridge_infra::Settings;
use simbridge_observability::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "simbridge", about = "eSIM catalog maintenance")]
struct Cli {
    /// Print JSON results on a single line.
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the provider feed, publish it, and repair offer mappings.
    Sync,
    /// Repair offer mappings against the current snapshot only.
    Reconcile,
    /// Report catalog integrity problems, optionally applying fixes.
    Audit {
        #[arg(long)]
        correct_volumes: bool,
        #[arg(long)]
        hide_orphans: bool,
        #[arg(long)]
        hide_duplicates: bool,
    },
    /// Show recent sync runs.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    simbridge_observability::init_with(
        std::env::var("LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or(LogFormat::Pretty),
    );

    let settings = Settings::from_env().context("invalid configuration")?;
    let services = app::build_services(&settings).await?;

    let output = match cli.command {
        Command::Sync => serde_json::to_value(services.sync.run().await?)?,
        Command::Reconcile => serde_json::to_value(services.sync.reconcile().await?)?,
        Command::Audit {
            correct_volumes,
            hide_orphans,
            hide_duplicates,
        } => {
            let fixes = AuditFixes {
                correct_volumes,
                hide_orphans,
                hide_duplicates,
            };
            serde_json::to_value(services.audit.run(fixes).await?)?
        }
        Command::Runs { limit } => serde_json::to_value(services.runs.list_runs(limit).await?)?,
    };

    let rendered = if cli.compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_flags_parse() {
        let cli = Cli::try_parse_from(["simbridge", "audit", "--hide-orphans", "--correct-volumes"]).unwrap();
        match cli.command {
            Command::Audit {
                correct_volumes,
                hide_orphans,
                hide_duplicates,
            } => {
                assert!(correct_volumes);
                assert!(hide_orphans);
                assert!(!hide_duplicates);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn runs_limit_defaults() {
        let cli = Cli::try_parse_from(["simbridge", "runs"]).unwrap();
        assert!(matches!(cli.command, Command::Runs { limit: 20 }));
    }
}
