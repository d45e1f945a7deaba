use crate::error::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// One shard as declared in the static sharding file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub name: String,
    pub index: usize,
    pub address: String,
}

impl ShardEntry {
    pub fn new(name: impl Into<String>, index: usize, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index,
            address: address.into(),
        }
    }
}

/// Validated, immutable view of the cluster's static sharding.
///
/// Built once at startup and shared read-only between request handlers;
/// no interior mutability, so no locking is needed.
#[derive(Debug, Clone)]
pub struct ShardTable {
    count: usize,
    current_index: usize,
    addresses: BTreeMap<usize, String>,
}

impl ShardTable {
    /// Validate the shard entries and locate the shard named `self_name`.
    ///
    /// Indices must be unique and cover `[0, entries.len())` without gaps,
    /// names must be unique, and `self_name` must name one of the entries.
    pub fn build(entries: &[ShardEntry], self_name: &str) -> Result<Self> {
        let count = entries.len();
        let mut addresses = BTreeMap::new();
        let mut names = HashSet::new();
        let mut current_index = None;

        for entry in entries {
            if addresses.contains_key(&entry.index) {
                return Err(KvError::DuplicateShardIndex(entry.index));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(KvError::DuplicateShardName(entry.name.clone()));
            }

            addresses.insert(entry.index, entry.address.clone());

            if entry.name == self_name {
                current_index = Some(entry.index);
            }
        }

        for index in 0..count {
            if !addresses.contains_key(&index) {
                return Err(KvError::MissingShardIndex(index));
            }
        }

        let current_index =
            current_index.ok_or_else(|| KvError::UnknownSelfShard(self_name.to_string()))?;

        Ok(Self {
            count,
            current_index,
            addresses,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Index of the shard that owns `key`.
    ///
    /// DANGER: the hash and modulus decide where every key lives. Changing
    /// either, or the shard count, while data exists orphans records unless
    /// a migration pass moves them.
    pub fn resolve_shard(&self, key: &[u8]) -> usize {
        (key_hash(key) % self.count as u64) as usize
    }

    pub fn is_local(&self, key: &[u8]) -> bool {
        self.resolve_shard(key) == self.current_index
    }

    pub fn address(&self, index: usize) -> Result<&str> {
        self.addresses
            .get(&index)
            .map(String::as_str)
            .ok_or_else(|| KvError::Config(format!("no address registered for shard {}", index)))
    }

    pub fn current_address(&self) -> Result<&str> {
        self.address(self.current_index)
    }
}

/// Shard placement hash: FNV-1a over the key bytes, then the murmur3
/// 64-bit finalizer.
///
/// The low bits of raw FNV-1a only see the low bits of each input byte, so
/// reducing it modulo a power of two would ignore most of the key.
pub fn key_hash(key: &[u8]) -> u64 {
    fmix64(fnv1a(key))
}

fn fnv1a(key: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in key {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<ShardEntry> {
        (0..n)
            .map(|i| ShardEntry::new(format!("shard-{}", i), i, format!("127.0.0.1:{}", 8080 + i)))
            .collect()
    }

    #[test]
    fn test_build_table() {
        let table = ShardTable::build(&entries(3), "shard-1").unwrap();
        assert_eq!(table.count(), 3);
        assert_eq!(table.current_index(), 1);
        assert_eq!(table.address(2).unwrap(), "127.0.0.1:8082");
        assert_eq!(table.current_address().unwrap(), "127.0.0.1:8081");
    }

    #[test]
    fn test_build_accepts_unordered_entries() {
        let mut shards = entries(3);
        shards.reverse();
        let table = ShardTable::build(&shards, "shard-0").unwrap();
        assert_eq!(table.current_index(), 0);
        assert_eq!(table.address(0).unwrap(), "127.0.0.1:8080");
    }

    #[test]
    fn test_duplicate_index() {
        let mut shards = entries(2);
        shards[1].index = 0;
        let err = ShardTable::build(&shards, "shard-0").unwrap_err();
        assert!(matches!(err, KvError::DuplicateShardIndex(0)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_index() {
        let mut shards = entries(3);
        shards[2].index = 5;
        let err = ShardTable::build(&shards, "shard-0").unwrap_err();
        assert!(matches!(err, KvError::MissingShardIndex(2)));
    }

    #[test]
    fn test_unknown_self_shard() {
        let err = ShardTable::build(&entries(2), "nowhere").unwrap_err();
        assert!(matches!(err, KvError::UnknownSelfShard(ref name) if name == "nowhere"));
    }

    #[test]
    fn test_duplicate_name() {
        let mut shards = entries(2);
        shards[1].name = "shard-0".to_string();
        let err = ShardTable::build(&shards, "shard-0").unwrap_err();
        assert!(matches!(err, KvError::DuplicateShardName(_)));
    }

    #[test]
    fn test_empty_table_is_rejected() {
        let err = ShardTable::build(&[], "shard-0").unwrap_err();
        assert!(matches!(err, KvError::UnknownSelfShard(_)));
    }

    #[test]
    fn test_fnv1a_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_key_hash_vectors() {
        assert_eq!(key_hash(b""), 0xefd01f60ba992926);
        assert_eq!(key_hash(b"a"), 0x82a2a958a9bece5b);
        assert_eq!(key_hash(b"foobar"), 0x2c22194922d1672b);
    }

    #[test]
    fn test_resolve_deterministic_and_total() {
        for n in 1..=8 {
            let table = ShardTable::build(&entries(n), "shard-0").unwrap();
            for i in 0..500 {
                let key = format!("key-{}", i);
                let shard = table.resolve_shard(key.as_bytes());
                assert!(shard < n);
                assert_eq!(shard, table.resolve_shard(key.as_bytes()));
            }
        }
    }

    #[test]
    fn test_resolve_known_keys() {
        let table = ShardTable::build(&entries(2), "shard-0").unwrap();
        assert_eq!(table.resolve_shard(b"foo"), 0);
        assert_eq!(table.resolve_shard(b"a"), 1);
        assert!(table.is_local(b"foo"));
        assert!(!table.is_local(b"a"));

        let shards: Vec<usize> = (0..10)
            .map(|i| table.resolve_shard(format!("key-{}", i).as_bytes()))
            .collect();
        assert_eq!(shards, vec![1, 0, 0, 1, 1, 1, 0, 0, 1, 0]);
    }

    #[test]
    fn test_single_bit_flips_move_keys() {
        // Flipping any one bit of a key should move it off its shard with
        // probability close to 1 - 1/n.
        for n in [2usize, 3, 4, 8] {
            let table = ShardTable::build(&entries(n), "shard-0").unwrap();
            let mut moved = 0usize;
            let mut total = 0usize;

            for i in 0..1000 {
                let mut key = format!("user-{:04}", i).into_bytes();
                let shard = table.resolve_shard(&key);
                for pos in 0..key.len() {
                    for bit in 0..8 {
                        key[pos] ^= 1 << bit;
                        if table.resolve_shard(&key) != shard {
                            moved += 1;
                        }
                        total += 1;
                        key[pos] ^= 1 << bit;
                    }
                }
            }

            let ratio = moved as f64 / total as f64;
            let expected = 1.0 - 1.0 / n as f64;
            assert!(
                (ratio - expected).abs() < 0.05,
                "{} shards: {:.3} of bit flips moved the key, expected ~{:.3}",
                n,
                ratio,
                expected
            );
        }
    }

    #[test]
    fn test_distribution() {
        let keys = 10_000;
        for n in 1..=16 {
            let table = ShardTable::build(&entries(n), "shard-0").unwrap();
            let mut counts = vec![0usize; n];
            for i in 0..keys {
                counts[table.resolve_shard(format!("key-{}", i).as_bytes())] += 1;
            }

            let expected = keys as f64 / n as f64;
            for (shard, count) in counts.iter().enumerate() {
                let deviation = (*count as f64 - expected).abs() / expected;
                assert!(
                    deviation < 0.2,
                    "shard {} of {} got {} keys, expected ~{}",
                    shard,
                    n,
                    count,
                    expected
                );
            }
        }
    }
}
