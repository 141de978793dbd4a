//! Calendar Backup Client - Main entry point
//!
//! Command-line front end for the backup server.

use anyhow::{Context, Result};
use calbackup_client::api::parse_date;
use calbackup_client::cache::{CacheFile, CacheReconciler};
use calbackup_client::{utils, BackupApi, Config};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server URL (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the server inventory into the local cache
    Sync,
    /// List the days of a month (YYYY-MM), marking those with a backup
    Month { month: String },
    /// Check whether a day (YYYY-MM-DD) has a backup
    Has { date: String },
    /// Take a backup for a day (default: today)
    Backup { date: Option<String> },
    /// Restore the database from a backup (YYYY-MM-DD or backup-YYYY-MM-DD.zip)
    Restore { identifier: String },
    /// Download an archive
    Download {
        filename: String,
        /// Destination file (default: the archive name in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };
    if let Some(url) = args.server {
        config.server.url = url;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let api = BackupApi::new(
        &config.server.url,
        Duration::from_secs(config.server.request_timeout_secs),
    )?;
    let reconciler = CacheReconciler::initialize(api, CacheFile::new(&config.cache.path)).await;

    match args.command {
        Command::Sync => {
            reconciler.settle().await;
            let count = reconciler.known_dates().await.len();
            if reconciler.is_synced().await {
                println!("{count} backups on {}", config.server.url);
            } else {
                println!("Server unreachable, {count} backups in local cache");
            }
        }
        Command::Month { month } => {
            let first = parse_month(&month)?;
            reconciler.settle().await;
            warn_if_offline(&reconciler).await;
            for day in days_of_month(first) {
                let mark = if reconciler.has_backup(day).await { "*" } else { " " };
                println!("{mark} {day} {}", day.weekday());
            }
        }
        Command::Has { date } => {
            let date = parse_date(&date)?;
            reconciler.settle().await;
            warn_if_offline(&reconciler).await;
            if reconciler.has_backup(date).await {
                println!("{date}: backup available");
            } else {
                println!("{date}: no backup");
            }
        }
        Command::Backup { date } => {
            let date = match date {
                Some(d) => parse_date(&d)?,
                None => chrono::Local::now().date_naive(),
            };
            let taken = reconciler.take_backup(date).await?;
            println!("{}", taken.message);
            if let Some(link) = taken.download_link {
                println!("Download: {}{link}", config.server.url.trim_end_matches('/'));
            }
            reconciler.settle().await;
        }
        Command::Restore { identifier } => {
            let restored = reconciler.restore(&identifier).await?;
            println!("{}", restored.message);
        }
        Command::Download { filename, out } => {
            let dest = out.unwrap_or_else(|| PathBuf::from(&filename));
            let bytes = reconciler.api().download(&filename, &dest).await?;
            println!("Saved {filename} to {} ({bytes} bytes)", dest.display());
        }
    }

    Ok(())
}

async fn warn_if_offline(reconciler: &CacheReconciler) {
    if !reconciler.is_synced().await {
        eprintln!("warning: server unreachable, showing cached backups");
    }
}

fn parse_month(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d")
        .with_context(|| format!("invalid month '{value}', expected YYYY-MM"))
}

fn days_of_month(first: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    first
        .iter_days()
        .take_while(move |d| d.month() == first.month())
}
