use crate::error::Result;
use crate::shard::ShardTable;
use std::future::Future;

/// Where a request for a key has to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Local,
    Remote { shard: usize, address: &'a str },
}

impl ShardTable {
    pub fn route(&self, key: &[u8]) -> Result<Route<'_>> {
        let shard = self.resolve_shard(key);
        if shard == self.current_index() {
            return Ok(Route::Local);
        }

        let address = self.address(shard)?;
        Ok(Route::Remote { shard, address })
    }
}

/// Serve `key` with `local` when this node owns it, otherwise hand the
/// owner's address to `forward`.
pub async fn route_or_serve<T, L, LF, F, FF>(
    table: &ShardTable,
    key: &[u8],
    local: L,
    forward: F,
) -> Result<T>
where
    L: FnOnce() -> LF,
    LF: Future<Output = Result<T>>,
    F: FnOnce(usize, String) -> FF,
    FF: Future<Output = Result<T>>,
{
    match table.route(key)? {
        Route::Local => local().await,
        Route::Remote { shard, address } => {
            tracing::debug!(
                "Forwarding key {:?} from shard {} to shard {} ({})",
                String::from_utf8_lossy(key),
                table.current_index(),
                shard,
                address
            );
            forward(shard, address.to_string()).await
        }
    }
}
