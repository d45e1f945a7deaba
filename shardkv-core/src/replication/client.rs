use super::protocol::{
    ACK_OK, DELETE_REPLICATION_KEY_PATH, DeleteReplicationKey, NEXT_REPLICATION_KEY_PATH,
    NextKeyValue,
};
use super::worker::ReplicationSource;
use crate::error::{KvError, Result};
use crate::storage::OutboxEntry;
use async_trait::async_trait;
use std::time::Duration;

/// HTTP client for talking to peer nodes. Every request is bounded by
/// `timeout` so a partitioned peer cannot stall the caller.
pub fn build_peer_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| KvError::Http(error.to_string()))
}

/// Pulls outbox entries from a primary over its HTTP endpoints.
#[derive(Clone)]
pub struct HttpReplicationSource {
    client: reqwest::Client,
    primary_addr: String,
}

impl HttpReplicationSource {
    pub fn new(client: reqwest::Client, primary_addr: impl Into<String>) -> Self {
        Self {
            client,
            primary_addr: primary_addr.into(),
        }
    }

    pub fn primary_addr(&self) -> &str {
        &self.primary_addr
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.primary_addr, path)
    }
}

#[async_trait]
impl ReplicationSource for HttpReplicationSource {
    async fn fetch_next(&self) -> Result<Option<OutboxEntry>> {
        let response = self
            .client
            .get(self.url(NEXT_REPLICATION_KEY_PATH))
            .send()
            .await
            .map_err(|error| KvError::Http(error.to_string()))?;

        let payload: NextKeyValue = response
            .json()
            .await
            .map_err(|error| KvError::Http(error.to_string()))?;

        payload.into_entry()
    }

    async fn ack(&self, entry: &OutboxEntry) -> Result<()> {
        tracing::debug!(
            "Deleting key={:?} from replication queue on {}",
            String::from_utf8_lossy(&entry.key),
            self.primary_addr
        );

        let response = self
            .client
            .get(self.url(DELETE_REPLICATION_KEY_PATH))
            .query(&DeleteReplicationKey::from_entry(entry))
            .send()
            .await
            .map_err(|error| KvError::Http(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| KvError::Http(error.to_string()))?;

        match status {
            reqwest::StatusCode::OK if body == ACK_OK => Ok(()),
            reqwest::StatusCode::EXPECTATION_FAILED => Err(KvError::StaleAck),
            reqwest::StatusCode::NOT_FOUND => Err(KvError::key_not_found(&entry.key)),
            _ => Err(KvError::Remote(format!("{}: {}", status, body))),
        }
    }
}
