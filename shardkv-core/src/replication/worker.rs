use crate::error::Result;
use crate::storage::{KvStore, OutboxEntry, run_blocking};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The primary side of replication as seen from a replica.
#[async_trait]
pub trait ReplicationSource: Send + Sync {
    /// Smallest pending outbox entry on the primary, `None` when caught up.
    async fn fetch_next(&self) -> Result<Option<OutboxEntry>>;

    /// Ask the primary to drop `entry` from its outbox.
    async fn ack(&self, entry: &OutboxEntry) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    /// Sleep after a failed fetch or apply.
    pub error_backoff: Duration,
    /// Sleep when the primary has nothing pending.
    pub idle_interval: Duration,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(1),
            idle_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied(OutboxEntry),
    CaughtUp,
}

pub struct ReplicationWorker<S> {
    store: Arc<KvStore>,
    source: S,
    settings: ReplicationSettings,
}

impl<S: ReplicationSource> ReplicationWorker<S> {
    pub fn new(store: Arc<KvStore>, source: S, settings: ReplicationSettings) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    /// Fetch, apply and acknowledge at most one entry.
    ///
    /// A failed acknowledgment is only logged: the entry stays queued on the
    /// primary and is applied again on a later step.
    pub async fn step(&self) -> Result<StepOutcome> {
        let Some(entry) = self.source.fetch_next().await? else {
            return Ok(StepOutcome::CaughtUp);
        };

        let store = self.store.clone();
        let (key, value) = (entry.key.clone(), entry.value.clone());
        run_blocking(move || store.put_local_only(&key, &value)).await?;

        if let Err(error) = self.source.ack(&entry).await {
            if error.is_benign_ack() {
                tracing::debug!(
                    "Replication ack for key={:?} was a no-op: {}",
                    String::from_utf8_lossy(&entry.key),
                    error
                );
            } else {
                tracing::warn!(
                    "Replication ack failed for key={:?}: {}",
                    String::from_utf8_lossy(&entry.key),
                    error
                );
            }
        }

        Ok(StepOutcome::Applied(entry))
    }

    /// Drain the primary forever. Errors never stop the loop.
    pub async fn run(self) {
        tracing::info!("Replication worker started");

        loop {
            match self.step().await {
                Ok(StepOutcome::Applied(_)) => {}
                Ok(StepOutcome::CaughtUp) => {
                    tokio::time::sleep(self.settings.idle_interval).await;
                }
                Err(error) => {
                    tracing::warn!("Replication loop error: {}", error);
                    tokio::time::sleep(self.settings.error_backoff).await;
                }
            }
        }
    }
}
