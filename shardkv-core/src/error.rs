use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("duplicate shard index: {0}")]
    DuplicateShardIndex(usize),

    #[error("shard {0} is not found")]
    MissingShardIndex(usize),

    #[error("shard {0:?} was not found")]
    UnknownSelfShard(String),

    #[error("duplicate shard name: {0:?}")]
    DuplicateShardName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("read-only mode")]
    ReadOnly,

    #[error("key does not exist: {0}")]
    KeyNotFound(String),

    #[error("value does not match")]
    StaleAck,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KvError {
    /// Errors that must stop the process at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateShardIndex(_)
                | Self::MissingShardIndex(_)
                | Self::UnknownSelfShard(_)
                | Self::DuplicateShardName(_)
                | Self::Config(_)
        )
    }

    /// Expected outcomes of an acknowledgment race; nothing to do.
    pub fn is_benign_ack(&self) -> bool {
        matches!(self, Self::KeyNotFound(_) | Self::StaleAck)
    }

    pub(crate) fn key_not_found(key: &[u8]) -> Self {
        Self::KeyNotFound(String::from_utf8_lossy(key).into_owned())
    }
}

pub type Result<T> = std::result::Result<T, KvError>;
