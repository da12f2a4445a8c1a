use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use semtrace_core::prelude::*;

mod commands;

/// semtrace - administrative CLI for the action-tracing library
#[derive(Parser)]
#[command(name = "semtrace")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML config file; falls back to TracerConfig::load() lookup.
    #[arg(long, global = true, env = "SEMTRACE_CONFIG")]
    config: Option<String>,

    /// `store://...`-style base URL for the object store (s3://, gs://, az://,
    /// file://); omit for deployments that never stored payloads.
    #[arg(long, global = true, env = "SEMTRACE_OBJECT_STORE_URL")]
    object_store_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive rows older than `archive_after_days` to cold storage (C11).
    ArchiveSweep {
        /// Log what would be archived without uploading or mutating anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Hard-delete rows whose retention window or archival age has passed.
    RetentionSweep,
    /// Erase every row matching a data subject or correlation id (C10).
    Erase {
        #[arg(long)]
        data_subject_id: Option<String>,
        #[arg(long)]
        correlation_id: Option<String>,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        purpose: String,
    },
}

/// Process exit codes (§6.5): 0 success, 1 configuration error, 2 partial
/// failure (some records skipped), 3 unreachable dependency.
#[repr(u8)]
enum ExitStatus {
    Success = 0,
    Config = 1,
    Partial = 2,
    Unreachable = 3,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let config = match commands::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Configuration error:".red().bold(), e);
            return ExitCode::from(ExitStatus::Config as u8);
        }
    };

    if matches!(cli.command, Commands::ArchiveSweep { .. }) && cli.object_store_url.is_none() {
        eprintln!(
            "{} {}",
            "Configuration error:".red().bold(),
            "archive-sweep requires --object-store-url (nothing to archive to)"
        );
        return ExitCode::from(ExitStatus::Config as u8);
    }

    let storage: Arc<dyn ActionExecutionStorage> = match commands::connect_storage(&config).await {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("{} {}", "Unreachable dependency:".red().bold(), e);
            return ExitCode::from(ExitStatus::Unreachable as u8);
        }
    };

    let objects = match commands::connect_objects(cli.object_store_url.as_deref()) {
        Ok(objects) => objects,
        Err(e) => {
            eprintln!("{} {}", "Unreachable dependency:".red().bold(), e);
            return ExitCode::from(ExitStatus::Unreachable as u8);
        }
    };

    let outcome = match cli.command {
        Commands::ArchiveSweep { dry_run } => commands::archive_sweep(storage.as_ref(), objects.as_ref(), &config, dry_run).await,
        Commands::RetentionSweep => commands::retention_sweep(storage.as_ref(), objects.as_ref(), &config).await,
        Commands::Erase { data_subject_id, correlation_id, user_id, purpose } => {
            commands::erase(storage.as_ref(), objects.as_ref(), data_subject_id, correlation_id, &user_id, &purpose).await
        }
    };

    match outcome {
        Ok(commands::Outcome::Clean(summary)) => {
            println!("{} {summary}", "OK:".green().bold());
            ExitCode::from(ExitStatus::Success as u8)
        }
        Ok(commands::Outcome::Partial(summary)) => {
            eprintln!("{} {summary}", "Partial failure:".yellow().bold());
            ExitCode::from(ExitStatus::Partial as u8)
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::from(ExitStatus::Unreachable as u8)
        }
    }
}
