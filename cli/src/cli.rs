//! # CLI Interface
//!
//! Defines the command-line argument structure for `chaindb` using `clap`
//! derive. Point operations take hex-encoded keys and values and address
//! one entry type.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use chaindb_storage::EntryType;

use crate::logging::LogFormat;

/// Inspect and maintain chaindb storage.
#[derive(Parser, Debug)]
#[command(
    name = "chaindb",
    about = "Inspect and maintain chaindb storage",
    version,
    propagate_version = true
)]
pub struct ChainDbCli {
    /// Path to the storage configuration file (TOML).
    ///
    /// When omitted, the built-in defaults are used (in-memory engine).
    #[arg(long, short = 'c', env = "CHAINDB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "CHAINDB_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// More log output; repeat for more. `CHAINDB_LOG` or `RUST_LOG` take
    /// precedence when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the `chaindb` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the value stored under a key, hex-encoded.
    Get(KeyArgs),
    /// Store a value under a key.
    Put(PutArgs),
    /// Remove a key.
    Delete(KeyArgs),
    /// Report whether a key is present.
    Has(KeyArgs),
    /// Print the entry-type ratio table and the resulting budgets.
    Ratios(RatiosArgs),
    /// Write a default configuration file.
    Init(InitArgs),
    /// Delete every remote table and bucket the configuration refers to.
    Decommission(DecommissionArgs),
}

/// Arguments naming one key of one entry type.
#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Entry type, by directory name (`statetrie`) or config name (`state-trie`).
    #[arg(long, short = 'e', value_parser = parse_entry)]
    pub entry: EntryType,

    /// Hex-encoded key, with or without `0x`.
    pub key: HexBytes,
}

/// Arguments for the `put` subcommand.
#[derive(Args, Debug)]
pub struct PutArgs {
    #[command(flatten)]
    pub target: KeyArgs,

    /// Hex-encoded value. An empty string stores an empty value.
    pub value: HexBytes,
}

/// Arguments for the `ratios` subcommand.
#[derive(Args, Debug)]
pub struct RatiosArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `init` subcommand.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the configuration.
    #[arg(long, short = 'o', default_value = "chaindb.toml")]
    pub output: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `decommission` subcommand.
#[derive(Args, Debug)]
pub struct DecommissionArgs {
    /// Confirm deletion. Without it the command only lists what it would delete.
    #[arg(long)]
    pub yes: bool,
}

fn parse_entry(s: &str) -> Result<EntryType, String> {
    s.parse().map_err(|e: chaindb_storage::StoreError| e.to_string())
}

/// Bytes given on the command line as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl FromStr for HexBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(digits)
            .map(Self)
            .map_err(|e| format!("invalid hex {s:?}: {e}"))
    }
}
