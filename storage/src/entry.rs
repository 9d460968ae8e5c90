//! # Entry Types & Ratio Table
//!
//! Chain data is split into logical domains ([`EntryType`]). Each domain
//! gets its own store (and its own directory or remote namespace), and a
//! share of the node-wide resource budget proportional to its ratio weight.
//!
//! | Entry type           | Directory            | Ratio |
//! |----------------------|----------------------|-------|
//! | Misc                 | `misc`               | 2     |
//! | Header               | `header`             | 5     |
//! | Body                 | `body`               | 5     |
//! | Receipts             | `receipts`           | 5     |
//! | StateTrie            | `statetrie`          | 40    |
//! | StateTrieMigration   | `statetrie_migrated` | 37    |
//! | TxLookup             | `txlookup`           | 2     |
//! | BridgeService        | `bridgeservice`      | 1     |
//! | Snapshot             | `snapshot`           | 3     |
//!
//! The weights must add up to exactly 100. They size cache memory and the
//! open-file budget; they have nothing to do with shard count.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Total every ratio table must add up to.
pub const RATIO_TOTAL: u32 = 100;

/// Logical domain of chain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Misc,
    Header,
    Body,
    Receipts,
    StateTrie,
    StateTrieMigration,
    TxLookup,
    BridgeService,
    Snapshot,
}

impl EntryType {
    /// Every entry type, in directory-layout order.
    pub const ALL: [EntryType; 9] = [
        Self::Misc,
        Self::Header,
        Self::Body,
        Self::Receipts,
        Self::StateTrie,
        Self::StateTrieMigration,
        Self::TxLookup,
        Self::BridgeService,
        Self::Snapshot,
    ];

    /// Default base directory / namespace.
    pub fn base_dir(self) -> &'static str {
        match self {
            Self::Misc => "misc",
            Self::Header => "header",
            Self::Body => "body",
            Self::Receipts => "receipts",
            Self::StateTrie => "statetrie",
            Self::StateTrieMigration => "statetrie_migrated",
            Self::TxLookup => "txlookup",
            Self::BridgeService => "bridgeservice",
            Self::Snapshot => "snapshot",
        }
    }

    /// Name used in configuration files.
    pub fn config_name(self) -> &'static str {
        match self {
            Self::Misc => "misc",
            Self::Header => "header",
            Self::Body => "body",
            Self::Receipts => "receipts",
            Self::StateTrie => "state-trie",
            Self::StateTrieMigration => "state-trie-migration",
            Self::TxLookup => "tx-lookup",
            Self::BridgeService => "bridge-service",
            Self::Snapshot => "snapshot",
        }
    }

    /// Default ratio weight.
    pub fn default_ratio(self) -> u32 {
        match self {
            Self::Misc => 2,
            Self::Header => 5,
            Self::Body => 5,
            Self::Receipts => 5,
            Self::StateTrie => 40,
            Self::StateTrieMigration => 37,
            Self::TxLookup => 2,
            Self::BridgeService => 1,
            Self::Snapshot => 3,
        }
    }

    /// Whether this domain is spread across the configured state-trie shards.
    pub fn is_partitioned(self) -> bool {
        matches!(self, Self::StateTrie | Self::StateTrieMigration)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_dir())
    }
}

impl FromStr for EntryType {
    type Err = StoreError;

    /// Accepts the directory name (`statetrie_migrated`) or the kebab-case
    /// config name (`state-trie-migration`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .into_iter()
            .find(|t| t.base_dir() == s || t.config_name() == s)
            .ok_or_else(|| StoreError::Config(format!("unknown entry type {s:?}")))
    }
}

/// One row of a [`RatioTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySpec {
    pub entry_type: EntryType,
    pub dir: String,
    pub ratio: u32,
}

impl EntrySpec {
    pub fn new(entry_type: EntryType, dir: impl Into<String>, ratio: u32) -> Self {
        Self {
            entry_type,
            dir: dir.into(),
            ratio,
        }
    }
}

/// Validated mapping from entry type to directory and ratio weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioTable {
    entries: Vec<EntrySpec>,
}

impl RatioTable {
    /// Validate and build a table.
    ///
    /// Fails unless every [`EntryType`] appears exactly once with a non-empty
    /// directory and a positive ratio, and the ratios sum to [`RATIO_TOTAL`].
    pub fn new(entries: Vec<EntrySpec>) -> StoreResult<Self> {
        let mut seen = HashSet::new();
        let mut sum = 0u32;
        for spec in &entries {
            if spec.dir.trim().is_empty() {
                return Err(StoreError::Config(format!(
                    "entry type {:?} has an empty directory",
                    spec.entry_type
                )));
            }
            if spec.ratio == 0 {
                return Err(StoreError::Config(format!(
                    "entry type {:?} has a zero ratio",
                    spec.entry_type
                )));
            }
            if !seen.insert(spec.entry_type) {
                return Err(StoreError::Config(format!(
                    "entry type {:?} listed twice",
                    spec.entry_type
                )));
            }
            sum = sum.saturating_add(spec.ratio);
        }

        if let Some(missing) = EntryType::ALL.iter().find(|t| !seen.contains(t)) {
            return Err(StoreError::Config(format!(
                "entry type {missing:?} missing from ratio table"
            )));
        }
        if sum != RATIO_TOTAL {
            return Err(StoreError::Config(format!(
                "entry ratios must sum to {RATIO_TOTAL}, got {sum}"
            )));
        }

        Ok(Self { entries })
    }

    /// Rows in the order they were supplied.
    pub fn entries(&self) -> &[EntrySpec] {
        &self.entries
    }

    /// Row for `entry_type`. Every validated table has one.
    pub fn spec(&self, entry_type: EntryType) -> &EntrySpec {
        self.entries
            .iter()
            .find(|s| s.entry_type == entry_type)
            .expect("validated ratio table covers every entry type")
    }

    /// `entry_type`'s share of `total`, rounded down. Exact for any `total`.
    pub fn share(&self, entry_type: EntryType, total: usize) -> usize {
        let share = total as u128 * u128::from(self.spec(entry_type).ratio) / u128::from(RATIO_TOTAL);
        // A ratio never exceeds the total, so the share fits back.
        usize::try_from(share).unwrap_or(total)
    }
}

impl Default for RatioTable {
    fn default() -> Self {
        let entries = EntryType::ALL
            .iter()
            .map(|t| EntrySpec::new(*t, t.base_dir(), t.default_ratio()))
            .collect();
        Self { entries }
    }
}
