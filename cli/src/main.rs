// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # chaindb CLI
//!
//! Entry point for the `chaindb` binary. Parses CLI arguments, initializes
//! logging, loads the storage configuration, and runs one command:
//!
//! - `get` / `put` / `delete` / `has` — point operations on one entry type
//! - `ratios`       — print the ratio table and per-entry budgets
//! - `init`         — write a default configuration file
//! - `decommission` — delete the remote resources of a configuration

mod cli;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;

use chaindb_storage::entry::RATIO_TOTAL;
use chaindb_storage::{DbConfig, DbManager, DbType, RatioTable};

use cli::{ChainDbCli, Commands, KeyArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ChainDbCli::parse();
    logging::init_logging(cli.verbose, cli.log_format)?;

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Get(args) => get(config, args).await,
        Commands::Put(args) => put(config, args).await,
        Commands::Delete(args) => delete(config, args).await,
        Commands::Has(args) => has(config, args).await,
        Commands::Ratios(args) => print_ratios(&config, args.json),
        Commands::Init(args) => init_config(args),
        Commands::Decommission(args) => decommission(&config, args.yes).await,
    }
}

fn load_config(cli: &ChainDbCli) -> Result<DbConfig> {
    match &cli.config {
        Some(path) => DbConfig::load(path)
            .with_context(|| format!("failed to load storage config from {}", path.display())),
        None => {
            tracing::debug!("no config file given, using defaults");
            Ok(DbConfig::default())
        }
    }
}

async fn open(config: DbConfig) -> Result<DbManager> {
    if config.db_type == DbType::Memory {
        tracing::warn!("memory engine selected; nothing written here outlives this process");
    }
    let dir = config.dir.clone();
    DbManager::open(config)
        .await
        .with_context(|| format!("failed to open storage at {}", dir.display()))
}

async fn get(config: DbConfig, args: KeyArgs) -> Result<()> {
    let manager = open(config).await?;
    let result = manager.store(args.entry).get(&args.key.0).await;
    manager.close().await.context("failed to close storage")?;

    match result {
        Ok(value) => {
            println!("0x{}", hex::encode(value));
            Ok(())
        }
        Err(e) if e.is_not_found() => bail!("key 0x{} not found in {}", hex::encode(&args.key.0), args.entry),
        Err(e) => Err(e).context("read failed"),
    }
}

async fn put(config: DbConfig, args: cli::PutArgs) -> Result<()> {
    let manager = open(config).await?;
    let store = manager.store(args.target.entry);
    store
        .put(&args.target.key.0, &args.value.0)
        .await
        .context("write failed")?;
    // Closing drains any queued remote writes and reports their failures.
    manager.close().await.context("failed to close storage")?;
    tracing::info!(
        entry = %args.target.entry,
        key = %hex::encode(&args.target.key.0),
        bytes = args.value.0.len(),
        "value stored"
    );
    Ok(())
}

async fn delete(config: DbConfig, args: KeyArgs) -> Result<()> {
    let manager = open(config).await?;
    manager
        .store(args.entry)
        .delete(&args.key.0)
        .await
        .context("delete failed")?;
    manager.close().await.context("failed to close storage")?;
    Ok(())
}

async fn has(config: DbConfig, args: KeyArgs) -> Result<()> {
    let manager = open(config).await?;
    let present = manager.store(args.entry).has(&args.key.0).await.context("read failed")?;
    manager.close().await.context("failed to close storage")?;
    println!("{present}");
    Ok(())
}

fn print_ratios(config: &DbConfig, json: bool) -> Result<()> {
    let table = RatioTable::default();
    let rows: Vec<_> = table
        .entries()
        .iter()
        .map(|spec| {
            let shards = if spec.entry_type.is_partitioned() {
                config.state_trie_shards
            } else {
                1
            };
            (spec, shards, table.share(spec.entry_type, config.cache_size_mb))
        })
        .collect();

    if json {
        let value: Vec<_> = rows
            .iter()
            .map(|(spec, shards, cache_mb)| {
                serde_json::json!({
                    "entry_type": spec.entry_type.config_name(),
                    "dir": spec.dir,
                    "ratio": spec.ratio,
                    "shards": shards,
                    "cache_mb": cache_mb,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{:<22} {:<20} {:>5} {:>6} {:>9}", "ENTRY TYPE", "DIR", "RATIO", "SHARDS", "CACHE MB");
    for (spec, shards, cache_mb) in &rows {
        println!(
            "{:<22} {:<20} {:>5} {:>6} {:>9}",
            spec.entry_type.config_name(),
            spec.dir,
            spec.ratio,
            shards,
            cache_mb
        );
    }
    println!("{:<22} {:<20} {:>5}", "total", "", RATIO_TOTAL);
    Ok(())
}

fn init_config(args: cli::InitArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", args.output.display());
    }
    let text = DbConfig::default().to_toml_string()?;
    std::fs::write(&args.output, text)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("wrote {}", args.output.display());
    Ok(())
}

async fn decommission(config: &DbConfig, confirmed: bool) -> Result<()> {
    if config.db_type != DbType::Remote {
        bail!("decommission only applies to the remote engine (configured: {})", config.db_type);
    }
    let table = RatioTable::default();
    let namespaces = DbManager::remote_namespaces(config, &table);
    if !confirmed {
        for name in &namespaces {
            println!("would delete {name}");
        }
        println!("re-run with --yes to delete {} namespaces", namespaces.len());
        return Ok(());
    }

    DbManager::decommission_remote(config, &table)
        .await
        .context("decommission failed")?;
    tracing::warn!(count = namespaces.len(), "remote namespaces decommissioned");
    Ok(())
}
