//! crvlol: Curve liquid locker yield tracker
//!
//! Samples the liquid locker compounders' share prices and pegs from an
//! archive node, keeps APR charts and vault stats in a JSON cache document,
//! and serves them over HTTP.

mod charts;
mod config;
mod constants;
mod harvests;
mod prices;
mod server;
mod staking;
mod store;
mod update;

use anyhow::Result;
use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use yield_core::{JsonRpcChain, Mode, Resolver, Retrying};

use config::{Config, FileConfig};
use store::Store;
use update::UpdateOptions;

#[derive(Parser, Debug)]
#[command(name = "crvlol")]
#[command(about = "APR tracking for Curve liquid locker compounders")]
struct Args {
    /// Config file
    #[arg(short, long, default_value = constants::CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Data directory for the cache document and database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Archive node RPC URL (overrides config.toml)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute APR series and vault stats
    Update {
        /// Only refresh the chart series
        #[arg(long, conflicts_with = "info_only")]
        charts_only: bool,

        /// Only refresh vault stats
        #[arg(long)]
        info_only: bool,
    },

    /// Find the block for a timestamp
    Resolve {
        /// Unix timestamp, RFC 3339 time or YYYY-MM-DD
        timestamp: String,

        /// First block at or after the timestamp (default: last block at or before)
        #[arg(long)]
        after: bool,
    },

    /// Run the HTTP API
    Serve,

    /// Manage harvest records
    Harvests {
        #[command(subcommand)]
        action: HarvestsCommand,
    },

    /// Manage weekly staking records
    Staking {
        #[command(subcommand)]
        action: StakingCommand,
    },

    /// Show database statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum HarvestsCommand {
    /// Import harvests from CSV file
    Import {
        /// Path to CSV file
        file: PathBuf,
    },

    /// List recent harvests
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = constants::DEFAULT_PAGE_SIZE)]
        per_page: u32,
    },
}

#[derive(Subcommand, Debug)]
enum StakingCommand {
    /// Import staking weeks from CSV file
    Import {
        /// Path to CSV file
        file: PathBuf,

        /// Look up missing start/end blocks on chain
        #[arg(long)]
        resolve_blocks: bool,
    },

    /// List staking weeks
    List {
        /// Only this account
        #[arg(long)]
        account: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = constants::DEFAULT_PAGE_SIZE)]
        per_page: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let file_config = FileConfig::load_or_default(&args.config)?;
    let config = Config::from_file(&file_config, args.rpc_url, args.data_dir)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Store::open(&config.database_path()).await?;

    match args.command {
        Command::Update {
            charts_only,
            info_only,
        } => {
            let options = UpdateOptions {
                charts: !info_only,
                info: !charts_only,
            };
            handle_update(&config, &store, options).await
        }
        Command::Resolve { timestamp, after } => handle_resolve(&config, &store, &timestamp, after).await,
        Command::Serve => server::serve(&config, store).await,
        Command::Harvests { action } => handle_harvests_command(action, &store).await,
        Command::Staking { action } => handle_staking_command(action, &config, &store).await,
        Command::Stats => {
            let stats = store.stats().await?;
            println!("Database: {}", config.database_path().display());
            println!("  {}", stats);
            print_document_status(&config.cache_path)?;
            Ok(())
        }
    }
}

async fn handle_update(config: &Config, store: &Store, options: UpdateOptions) -> Result<()> {
    println!("Curve Liquid Locker APR Update");
    println!("==============================\n");
    println!("RPC: {}", mask_rpc_url(config.require_rpc_url()?));
    println!("Vaults: {}\n", config.registry.symbols().join(", "));

    let summary = update::run_update(config, store, options).await?;

    for (name, observations) in &summary.series {
        println!("  {:<20} {:>3} observations", name, observations);
    }
    if options.info {
        println!("  {:<20} {:>3} vaults", "Vault snapshots", summary.snapshots);
    }
    if options.charts {
        println!(
            "\n{} chart file(s) written to {}, {} old file(s) removed",
            summary.chart_files,
            config.charts_dir.display(),
            summary.charts_removed
        );
    }
    println!("{} new block timestamp(s) cached", summary.new_timestamps);
    println!("\nCache document: {}", config.cache_path.display());
    Ok(())
}

async fn handle_resolve(config: &Config, store: &Store, timestamp: &str, after: bool) -> Result<()> {
    let target = parse_timestamp(timestamp)?;
    let mode = if after { Mode::After } else { Mode::Before };

    let chain = Retrying::new(JsonRpcChain::new(config.require_rpc_url()?), config.retry.clone());
    let mut resolver = Resolver::with_known_timestamps(&chain, store.get_block_timestamps().await?);

    let (height, block_ts) = resolver.resolve_with_timestamp(target, mode).await?;
    store.store_block_timestamps(resolver.known_timestamps()).await?;

    let when = DateTime::from_timestamp(block_ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    println!("Block {} at {} ({})", height, block_ts, when);
    println!("{} oracle read(s)", resolver.oracle_reads());
    Ok(())
}

/// Handle harvest subcommands
async fn handle_harvests_command(action: HarvestsCommand, store: &Store) -> Result<()> {
    match action {
        HarvestsCommand::Import { file } => {
            let harvests = harvests::load_from_csv(&file)?;
            let count = store.import_harvests(&harvests).await?;
            println!("Imported {} harvests from {}", count, file.display());
            Ok(())
        }

        HarvestsCommand::List { page, per_page } => {
            let page = page.max(1) as u64;
            let per_page = per_page.clamp(1, constants::MAX_PAGE_SIZE) as u64;
            let harvests = store.get_harvests((page - 1) * per_page, per_page).await?;

            if harvests.items.is_empty() {
                println!("No harvests recorded.");
                println!("\nUse 'crvlol harvests import <file.csv>' to import harvests");
                return Ok(());
            }

            println!(
                "{:<22} {:<20} {:>28} {:>10}  Txn",
                "Date", "Vault", "Profit", "Block"
            );
            println!("{}", "-".repeat(100));
            for harvest in &harvests.items {
                println!(
                    "{:<22} {:<20} {:>28} {:>10}  {}",
                    harvest.date_str,
                    truncate(&harvest.name, 20),
                    harvest.profit,
                    harvest.block,
                    truncate(&harvest.txn_hash, 14),
                );
            }
            println!("{}", "-".repeat(100));
            println!(
                "Page {} ({} of {} harvest(s))",
                page,
                harvests.items.len(),
                harvests.total
            );
            Ok(())
        }
    }
}

/// Handle staking subcommands
async fn handle_staking_command(action: StakingCommand, config: &Config, store: &Store) -> Result<()> {
    match action {
        StakingCommand::Import {
            file,
            resolve_blocks,
        } => {
            let mut weeks = staking::load_from_csv(&file)?;

            if resolve_blocks {
                let chain =
                    Retrying::new(JsonRpcChain::new(config.require_rpc_url()?), config.retry.clone());
                let mut resolver =
                    Resolver::with_known_timestamps(&chain, store.get_block_timestamps().await?);
                let filled = staking::fill_missing_blocks(&mut resolver, &mut weeks).await?;
                store.store_block_timestamps(resolver.known_timestamps()).await?;
                println!("Resolved block range for {} week(s)", filled);
            }

            let count = store.import_staking_weeks(&weeks).await?;
            println!("Imported {} staking weeks from {}", count, file.display());
            Ok(())
        }

        StakingCommand::List {
            account,
            page,
            per_page,
        } => {
            let page = page.max(1) as u64;
            let per_page = per_page.clamp(1, constants::MAX_PAGE_SIZE) as u64;
            let weeks = store
                .get_staking_weeks(account.as_deref(), (page - 1) * per_page, per_page)
                .await?;

            if weeks.items.is_empty() {
                println!("No staking weeks recorded.");
                println!("\nUse 'crvlol staking import <file.csv>' to import staking data");
                return Ok(());
            }

            println!(
                "{:<6} {:<14} {:>12} {:>12} {:>16} {:>8}",
                "Week", "Account", "Start", "End", "Stake", "Weight"
            );
            println!("{}", "-".repeat(74));
            for week in &weeks.items {
                let block = |b: Option<u64>| b.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<6} {:<14} {:>12} {:>12} {:>16.4} {:>8.4}",
                    week.week_number,
                    truncate(&week.account, 14),
                    block(week.start_block),
                    block(week.end_block),
                    week.stake_amount,
                    week.weight,
                );
            }
            println!("{}", "-".repeat(74));
            println!(
                "Page {} ({} of {} row(s))",
                page,
                weeks.items.len(),
                weeks.total
            );
            Ok(())
        }
    }
}

fn print_document_status(path: &Path) -> Result<()> {
    if !path.exists() {
        println!("Cache document: {} (not yet written)", path.display());
        return Ok(());
    }
    let document = yield_core::CacheDocument::load(path)?;
    let updated = document
        .last_updated
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!("Cache document: {}", path.display());
    println!("  last updated {}", updated);
    println!(
        "  {} weekly, {} trailing observations, {} vault snapshot(s)",
        document.chart_data.weekly_aprs.len(),
        document.chart_data.apr_since.len(),
        document.ll_data.len()
    );
    Ok(())
}

/// Unix seconds, RFC 3339, or a UTC calendar date
fn parse_timestamp(s: &str) -> Result<i64> {
    let s = s.trim();
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    anyhow::bail!("Invalid timestamp '{}'. Use unix seconds, RFC 3339 or YYYY-MM-DD", s)
}

/// Hide API keys embedded in RPC URLs for safe printing.
/// Handles `?apikey=...`/`?api-key=...` and `/v2/<key>` style endpoints.
fn mask_rpc_url(url: &str) -> String {
    for marker in ["api-key=", "apikey=", "key="] {
        if let Some(idx) = url.find(marker) {
            return format!("{}****", &url[..idx + marker.len()]);
        }
    }
    match url.rsplit_once('/') {
        Some((prefix, last))
            if last.len() >= 20 && last.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            format!("{}/****", prefix)
        }
        _ => url.to_string(),
    }
}

/// Truncate string for display
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("1718236800").unwrap(), 1_718_236_800);
        assert_eq!(parse_timestamp("2024-06-13").unwrap(), 1_718_236_800);
        assert_eq!(parse_timestamp("2024-06-13T02:00:00+02:00").unwrap(), 1_718_236_800);
        assert!(parse_timestamp("last tuesday").is_err());
    }

    #[test]
    fn test_mask_rpc_url() {
        assert_eq!(
            mask_rpc_url("https://eth-mainnet.g.alchemy.com/v2/abcdefghijklmnopqrstuvwxyz"),
            "https://eth-mainnet.g.alchemy.com/v2/****"
        );
        assert_eq!(
            mask_rpc_url("https://rpc.example.com/?api-key=SECRET"),
            "https://rpc.example.com/?api-key=****"
        );
        assert_eq!(mask_rpc_url("http://localhost:8545"), "http://localhost:8545");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Union Convex CRV", 20), "Union Convex CRV");
        assert_eq!(truncate("0x1234567890abcdef", 10), "0x12345...");
    }

    #[test]
    fn test_update_flags() {
        let args = Args::try_parse_from(["crvlol", "update", "--charts-only"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Update {
                charts_only: true,
                info_only: false
            }
        ));
        assert!(Args::try_parse_from(["crvlol", "update", "--charts-only", "--info-only"]).is_err());
    }
}
