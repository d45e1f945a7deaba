use crate::error::{KvError, Result};
use crate::storage::OutboxEntry;
use serde::{Deserialize, Serialize};

pub const NEXT_REPLICATION_KEY_PATH: &str = "/next-replication-key";
pub const DELETE_REPLICATION_KEY_PATH: &str = "/delete-replication-key";
pub const ACK_OK: &str = "ok";

/// Payload of `GET /next-replication-key`.
///
/// Key and value are hex encoded. An empty `key` means the outbox is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextKeyValue {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl NextKeyValue {
    pub fn from_entry(entry: Option<&OutboxEntry>) -> Self {
        match entry {
            Some(entry) => Self {
                key: hex::encode(&entry.key),
                value: hex::encode(&entry.value),
                error: None,
            },
            None => Self::default(),
        }
    }

    pub fn from_error(error: &KvError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Decode into an entry; `Ok(None)` when the primary has nothing queued.
    pub fn into_entry(self) -> Result<Option<OutboxEntry>> {
        if let Some(error) = self.error {
            return Err(KvError::Remote(error));
        }

        if self.key.is_empty() {
            return Ok(None);
        }

        Ok(Some(OutboxEntry {
            key: decode_hex("key", &self.key)?,
            value: decode_hex("value", &self.value)?,
        }))
    }
}

/// Query parameters of `GET /delete-replication-key`, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReplicationKey {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl DeleteReplicationKey {
    pub fn from_entry(entry: &OutboxEntry) -> Self {
        Self {
            key: hex::encode(&entry.key),
            value: hex::encode(&entry.value),
        }
    }

    pub fn into_entry(self) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            key: decode_hex("key", &self.key)?,
            value: decode_hex("value", &self.value)?,
        })
    }
}

fn decode_hex(field: &str, raw: &str) -> Result<Vec<u8>> {
    hex::decode(raw)
        .map_err(|error| KvError::InvalidRequest(format!("invalid hex in {}: {}", field, error)))
}
