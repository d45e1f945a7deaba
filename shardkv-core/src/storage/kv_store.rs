use crate::error::{KvError, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A write that has not yet been confirmed by the replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl OutboxEntry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// SQLite-backed store holding the `kv_data` table and the `kv_outbox`
/// replication queue.
///
/// Every operation runs in its own transaction on a fresh connection. The
/// database runs in WAL mode, so readers never wait on the single writer.
pub struct KvStore {
    db_path: PathBuf,
    read_only: bool,
}

impl KvStore {
    /// Open (or create) the store at `db_path`.
    ///
    /// `read_only` disables [`KvStore::put`]; replicas only receive data
    /// through [`KvStore::put_local_only`].
    pub fn open(db_path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path, read_only };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened {:?} with journal_mode={}", self.db_path, mode);

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_data (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;

        // Pending replication, one row per key holding its latest value
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_outbox (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;

        Ok(())
    }

    /// Get the value stored for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.get_conn()?;

        let value = conn
            .query_row("SELECT value FROM kv_data WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(value)
    }

    /// Write a record and queue it for replication, atomically.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(KvError::ReadOnly);
        }
        ensure_key(key)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT OR REPLACE INTO kv_data (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO kv_outbox (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Write a record without queuing it for replication.
    ///
    /// DANGER: only for applying entries pulled from a primary.
    pub fn put_local_only(&self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure_key(key)?;

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_data (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;

        Ok(())
    }

    /// The outbox entry with the smallest key, if any.
    pub fn peek_oldest_outbox_entry(&self) -> Result<Option<OutboxEntry>> {
        let conn = self.get_conn()?;

        let entry = conn
            .query_row(
                "SELECT key, value FROM kv_outbox ORDER BY key LIMIT 1",
                [],
                |row| {
                    Ok(OutboxEntry {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(entry)
    }

    /// Remove `key` from the outbox if it still holds exactly `value`.
    ///
    /// Fails with [`KvError::KeyNotFound`] if the key is not queued and
    /// [`KvError::StaleAck`] if it was overwritten since it was read.
    pub fn ack_outbox_entry(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<Vec<u8>> = tx
            .query_row("SELECT value FROM kv_outbox WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        match current {
            None => return Err(KvError::key_not_found(key)),
            Some(current) if current != value => return Err(KvError::StaleAck),
            Some(_) => {}
        }

        tx.execute("DELETE FROM kv_outbox WHERE key = ?1", [key])?;
        tx.commit()?;
        Ok(())
    }

    pub fn outbox_entry(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let conn = self.get_conn()?;

        let value = conn
            .query_row("SELECT value FROM kv_outbox WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(value)
    }

    pub fn outbox_len(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv_outbox", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn data_len(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv_data", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete every record for which `is_extra` returns true.
    ///
    /// Keys are collected in a read pass and then deleted in a single write
    /// transaction. The outbox is left alone.
    /// DANGER: hard delete, intended only after a deliberate reshard.
    pub fn purge_non_owned_keys<F>(&self, is_extra: F) -> Result<usize>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut conn = self.get_conn()?;

        let extra: Vec<Vec<u8>> = {
            let mut stmt = conn.prepare("SELECT key FROM kv_data ORDER BY key")?;
            let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

            let mut keys = Vec::new();
            for row in rows {
                let key = row?;
                if is_extra(key.as_slice()) {
                    keys.push(key);
                }
            }
            keys
        };

        if extra.is_empty() {
            return Ok(0);
        }

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare("DELETE FROM kv_data WHERE key = ?1")?;
            for key in &extra {
                stmt.execute([key])?;
            }
        }
        tx.commit()?;

        tracing::info!("Purged {} keys from {:?}", extra.len(), self.db_path);
        Ok(extra.len())
    }
}

fn ensure_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidRequest("key cannot be empty".to_string()));
    }
    Ok(())
}
