//! PixStu cache utility - inspect and maintain the generation cache.
//!
//! Thin client over `pixstu-cache`: every command maps onto one store
//! operation against the chosen namespace.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pixstu_cache::{CacheStore, PathsConfig, RuntimeConfig};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pixstu-cachectl")]
#[command(about = "PixStu generation cache utility")]
struct Args {
    /// Project root containing the .pixstu directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Cache database path (defaults to <root>/.pixstu/cache.sqlite)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Cache namespace
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Override the namespace byte budget (0 = unbounded)
    #[arg(long)]
    max_bytes: Option<u64>,

    /// Override the entry TTL in seconds (0 = no expiry)
    #[arg(long)]
    ttl: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show entry count and size
    Stats {
        /// Report every namespace in the database
        #[arg(long)]
        all: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List entries, most recently used first
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Drop expired entries, then evict down to a byte target
    Prune {
        /// Target size in bytes (defaults to the configured budget)
        #[arg(long)]
        target_bytes: Option<u64>,
    },
    /// Drop expired entries only
    Purge,
    /// Remove every entry in the namespace
    Clear,
    /// Compact the database file
    Vacuum,
}

fn format_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = value as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}

fn open_store(args: &Args) -> Result<CacheStore> {
    let runtime = RuntimeConfig::load(PathsConfig::runtime_config_path(&args.root))
        .context("Failed to load runtime config")?;

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| PathsConfig::cache_db_path(&args.root));

    let mut config = runtime.cache_config(db_path, args.namespace.as_str())?;
    if let Some(max_bytes) = args.max_bytes {
        config = config.with_max_bytes(max_bytes);
    }
    if let Some(ttl) = args.ttl {
        config = config.with_ttl_seconds(ttl);
    }

    debug!(
        "Opening namespace '{}' in {} (max_bytes={}, ttl={}s)",
        config.namespace,
        config.db_path.display(),
        config.max_bytes,
        config.ttl_seconds
    );

    let store = CacheStore::open(config).context("Failed to open cache")?;
    Ok(store)
}

fn run(args: &Args) -> Result<()> {
    let store = open_store(args)?;

    match &args.command {
        Command::Stats { all, json } => {
            let stats = if *all {
                store.db().namespaces()?
            } else {
                vec![store.stats()?]
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                for ns in stats {
                    println!("Namespace: {}", ns.namespace);
                    println!("Entries: {}", ns.entry_count);
                    println!("Size: {}", format_bytes(ns.total_bytes));
                }
            }
        }
        Command::List { json } => {
            let entries = store.entries()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("Cache empty");
            } else {
                for entry in entries {
                    println!(
                        "{}\n  size: {}\n  last_touched: {}",
                        entry.key,
                        format_bytes(entry.size_bytes),
                        entry.last_touched.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
            }
        }
        Command::Prune { target_bytes } => {
            let expired = store.purge_expired()?;
            let target = target_bytes.unwrap_or(store.max_bytes());

            let freed = if target_bytes.is_some() || target > 0 {
                store.prune(target)?
            } else {
                0
            };

            println!(
                "Cache pruned: {} expired, {} freed",
                expired,
                format_bytes(freed)
            );
        }
        Command::Purge => {
            let expired = store.purge_expired()?;
            println!("Removed {} expired entries", expired);
        }
        Command::Clear => {
            let removed = store.clear()?;
            println!("Cache cleared ({} entries)", removed);
        }
        Command::Vacuum => {
            store.db().vacuum()?;
            println!("Cache vacuumed");
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so --json output stays parseable
    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    run(&args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "pixstu-cachectl",
            "--namespace",
            "inpaint",
            "--max-bytes",
            "1000",
            "prune",
            "--target-bytes",
            "10",
        ])
        .unwrap();

        assert_eq!(args.namespace, "inpaint");
        assert_eq!(args.max_bytes, Some(1000));
        assert!(matches!(
            args.command,
            Command::Prune {
                target_bytes: Some(10)
            }
        ));
    }

    #[test]
    fn test_negative_budget_rejected() {
        assert!(Args::try_parse_from(["pixstu-cachectl", "--max-bytes", "-1", "stats"]).is_err());
    }
}
