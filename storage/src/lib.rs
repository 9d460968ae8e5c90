// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # chaindb — Storage Layer
//!
//! Key-value storage for a blockchain node. Upper layers (state trie, chain
//! indexer, receipts) talk to one small contract, and the engine behind it
//! is a configuration choice: an in-memory map, RocksDB, sled, or a remote
//! table-plus-bucket service.
//!
//! ## Architecture
//!
//! - **store** — The `Store`/`Batch` contract, `DbType`, and the `Slot`
//!   tri-state that normalizes empty values across engines.
//! - **memory** — Reference engine. Tests and ephemeral nodes.
//! - **lsm** — RocksDB adapter.
//! - **sorted_kv** — sled adapter with tagged values, because empty values
//!   are not safe to hand to the engine.
//! - **remote** — Metadata table plus payload bucket over object storage,
//!   written by a single queued worker with bounded retries.
//! - **partition** — Routes keys across N same-kind shards by key prefix.
//! - **entry** — Entry types and the ratio table that splits resources.
//! - **manager** — Opens one store (or shard set) per entry type.
//! - **config** — TOML configuration.
//! - **metrics** — Prometheus counters for the remote write path.
//!
//! ## Guarantees
//!
//! 1. An empty value is a value. It is never confused with absence.
//! 2. Per key, the last write wins, in the order writes were accepted.
//! 3. `close` is terminal and never loses an accepted write silently.
//! 4. A batch spanning shards is not atomic; failures name the shards.

pub mod config;
pub mod entry;
pub mod error;
pub mod lsm;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod partition;
pub mod remote;
pub mod sorted_kv;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod conformance;

pub use config::DbConfig;
pub use entry::{EntrySpec, EntryType, RatioTable};
pub use error::{StoreError, StoreResult};
pub use manager::DbManager;
pub use partition::PartitionedStore;
pub use store::{Batch, DbType, Slot, Store, IDEAL_BATCH_SIZE};
