//! Main entry point for the strongbox backup CLI

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use strongbox_common::LoggingTransformer;
use strongbox_snapshot::db::{ConnectionTarget, PgDatabase, TableRegistry};
use strongbox_snapshot::{
    Availability, DatabaseStrategy, JsonFallbackStrategy, NativeToolStrategy, OperationKind,
    SnapshotConfig, SnapshotError, SnapshotOrchestrator,
};

/// Minimum password length accepted for new archives
const MIN_PASSWORD_CHARS: usize = 12;

/// Environment variable read instead of prompting for the password
const PASSWORD_ENV: &str = "STRONGBOX_PASSWORD";

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(about = "Encrypted full-system backup and restore", version)]
struct Cli {
    /// Uploaded media directory (default: $STRONGBOX_MEDIA_DIR or ./uploads)
    #[arg(long, global = true)]
    media_dir: Option<PathBuf>,

    /// Application source tree to include in backups
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    /// Directory for finished archives
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an encrypted archive of the database, media and source tree
    ///
    /// The password is read from $STRONGBOX_PASSWORD or prompted for, and
    /// must be at least 12 characters.
    Create,

    /// Restore the database and media from an encrypted archive
    ///
    /// Site code in the archive is never restored.
    Restore {
        /// Archive produced by `strongbox create`
        archive: PathBuf,
    },

    /// Report which database export strategy is usable
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggingTransformer::init();
    let cli = Cli::parse();

    let mut config = SnapshotConfig::from_env();
    if let Some(dir) = cli.media_dir {
        config.media_dir = dir;
    }
    if let Some(dir) = cli.source_dir {
        config.source_dir = Some(dir);
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    let strategies = build_strategies(&config)?;

    match cli.command {
        Commands::Create => {
            let password = read_password("Backup password: ", true)?;
            let orchestrator = SnapshotOrchestrator::new(config, strategies);
            let file = orchestrator
                .create(&password)
                .await
                .map_err(|e| report_failure(&e, OperationKind::Create))?;
            if cli.json {
                println!("{}", json!({ "success": true, "operation": "create", "file": file }));
            } else {
                println!(
                    "Backup written to {} ({} bytes)",
                    file.file_path.display(),
                    file.size_bytes
                );
            }
        }
        Commands::Restore { archive } => {
            let password = read_password("Archive password: ", false)?;
            let orchestrator = SnapshotOrchestrator::new(config, strategies);
            let report = orchestrator
                .restore(&archive, &password)
                .await
                .map_err(|e| report_failure(&e, OperationKind::Restore))?;
            if cli.json {
                println!(
                    "{}",
                    json!({ "success": true, "operation": "restore", "report": report })
                );
            } else {
                println!(
                    "Restore complete: {} rows via the {} strategy",
                    report.total_rows(),
                    report.strategy
                );
                for skip in &report.skipped {
                    println!("  skipped {}: {}", skip.table, skip.reason);
                }
                if !report.media_replaced {
                    println!("  media directory left unchanged");
                }
            }
        }
        Commands::Probe => {
            for strategy in &strategies {
                let status = match strategy.probe().await {
                    Availability::Available(detail) => format!("available ({detail})"),
                    Availability::Missing(reason) => format!("missing ({reason})"),
                    Availability::Broken(reason) => format!("broken ({reason})"),
                };
                if cli.json {
                    println!("{}", json!({ "strategy": strategy.name(), "status": status }));
                } else {
                    println!("{:<10} {status}", strategy.name());
                }
            }
        }
    }

    Ok(())
}

/// Log the full error and hand back the text safe to show the operator
fn report_failure(error: &SnapshotError, kind: OperationKind) -> anyhow::Error {
    if error.is_user_error() {
        log::warn!("{kind} rejected: {error}");
    } else {
        log::error!("{kind} failed: {error}");
    }
    anyhow!(error.user_message(kind))
}

fn build_strategies(config: &SnapshotConfig) -> anyhow::Result<Vec<Arc<dyn DatabaseStrategy>>> {
    let url = config.database_url()?;
    let target = ConnectionTarget::parse(&url)?;
    let db = Arc::new(PgDatabase::connect_lazy(&target, 4).context("configuring database pool")?);
    let registry = Arc::new(TableRegistry::classifieds(db));

    Ok(vec![
        Arc::new(NativeToolStrategy::postgres()),
        Arc::new(JsonFallbackStrategy::new(registry, config.transaction_timeout())),
    ])
}

fn read_password(prompt: &str, enforce_length: bool) -> anyhow::Result<SecretString> {
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(value) if !value.is_empty() => SecretString::from(value),
        _ => {
            print!("{prompt}");
            std::io::stdout().flush()?;
            SecretString::from(rpassword::read_password()?)
        }
    };

    if password.expose_secret().is_empty() {
        bail!("Password cannot be empty");
    }
    if enforce_length && password.expose_secret().chars().count() < MIN_PASSWORD_CHARS {
        bail!("Password must be at least {MIN_PASSWORD_CHARS} characters");
    }
    Ok(password)
}
