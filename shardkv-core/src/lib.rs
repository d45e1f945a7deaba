//! ShardKV Core - statically sharded key-value store
//!
//! Each node owns a fixed partition of the keyspace:
//! - FNV-1a + fmix64 key hashing over a static shard table
//! - SQLite data table plus a replication outbox written in one transaction
//! - Replicas pull, apply and acknowledge outbox entries from their primary

pub mod error;
pub mod operations;
pub mod replication;
pub mod routing;
pub mod shard;
pub mod storage;

pub use error::{KvError, Result};
pub use operations::{
    MigrateOperation, MigrateOutcome, PurgeExtraKeysOperation, PurgeExtraKeysResult,
    ScaleDirection,
};
pub use replication::{
    HttpReplicationSource, NextKeyValue, ReplicationSettings, ReplicationSource,
    ReplicationWorker, StepOutcome, build_peer_client,
};
pub use routing::{Route, route_or_serve};
pub use shard::{ShardEntry, ShardTable, key_hash};
pub use storage::{KvStore, OutboxEntry, run_blocking};
