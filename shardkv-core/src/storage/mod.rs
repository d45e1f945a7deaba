//! Storage modules for ShardKV
//!
//! Durable key-value records plus the replication outbox.

pub mod kv_store;

pub use kv_store::{KvStore, OutboxEntry};

use crate::error::{KvError, Result};

/// Run a store call on tokio's blocking pool. SQLite calls may wait on
/// `busy_timeout`, which must not stall the async workers.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|error| KvError::Internal(format!("blocking store task failed: {}", error)))?
}
