use crate::{KvStore, Result, ShardTable};
use std::sync::Arc;

/// Drops records that the shard table assigns to other shards.
#[derive(Clone)]
pub struct PurgeExtraKeysOperation {
    store: Arc<KvStore>,
    table: Arc<ShardTable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeExtraKeysResult {
    pub shard_index: usize,
    pub purged: usize,
}

impl PurgeExtraKeysOperation {
    pub fn new(store: Arc<KvStore>, table: Arc<ShardTable>) -> Self {
        Self { store, table }
    }

    /// DANGER: irreversible. Run only after a deliberate reshard.
    pub fn run(&self) -> Result<PurgeExtraKeysResult> {
        let table = &self.table;
        let purged = self
            .store
            .purge_non_owned_keys(|key| table.resolve_shard(key) != table.current_index())?;

        tracing::info!(
            "Purged {} keys not owned by shard {}",
            purged,
            table.current_index()
        );

        Ok(PurgeExtraKeysResult {
            shard_index: table.current_index(),
            purged,
        })
    }
}
