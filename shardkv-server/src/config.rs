use serde::{Deserialize, Serialize};
use shardkv_core::{KvError, ReplicationSettings, Result, ShardEntry};
use std::time::Duration;

/// Static sharding file, usually `sharding.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(alias = "Shards")]
    pub shards: Vec<ShardConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Idx")]
    pub idx: usize,
    #[serde(alias = "Address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            error_backoff_ms: default_error_backoff_ms(),
            idle_interval_ms: default_idle_interval_ms(),
        }
    }
}

impl ReplicationConfig {
    pub fn settings(&self) -> ReplicationSettings {
        ReplicationSettings {
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            idle_interval: Duration::from_millis(self.idle_interval_ms),
        }
    }
}

fn default_error_backoff_ms() -> u64 {
    1_000
}

fn default_idle_interval_ms() -> u64 {
    100
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .build()
            .map_err(|e| KvError::Config(e.to_string()))?;

        Self::from_settings(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Toml))
            .build()
            .map_err(|e| KvError::Config(e.to_string()))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: ::config::Config) -> Result<Self> {
        let config: Config = settings
            .try_deserialize()
            .map_err(|e| KvError::Config(e.to_string()))?;

        if config.network.request_timeout_ms == 0 {
            return Err(KvError::Config(
                "network.request_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn shard_entries(&self) -> Vec<ShardEntry> {
        self.shards
            .iter()
            .map(|shard| ShardEntry::new(shard.name.clone(), shard.idx, shard.address.clone()))
            .collect()
    }
}
