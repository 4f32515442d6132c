//! Deterministic key → shard mapping and the sharded map both stores use.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// Default number of shards per store.
pub const DEFAULT_SHARD_COUNT: usize = 100;

/// Divisor applied to the digest prefix before the modulo.
pub const BUCKET_FACTOR: u64 = 10_000;

/// Map `key` onto `[0, shard_count)`.
///
/// Stable across calls and processes. A `shard_count` of zero is treated as one.
pub fn shard_of(key: &str, shard_count: usize) -> usize {
    let digest = Sha256::digest(key.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64;
    let shards = shard_count.max(1) as u64;
    ((prefix / BUCKET_FACTOR) % shards) as usize
}

/// A string-keyed map partitioned into disjoint shards.
#[derive(Debug)]
pub struct ShardedMap<V> {
    shards: Vec<HashMap<String, V>>,
}

impl<V> ShardedMap<V> {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| HashMap::new()).collect(),
        }
    }

    fn shard(&self, key: &str) -> &HashMap<String, V> {
        &self.shards[shard_of(key, self.shards.len())]
    }

    fn shard_mut(&mut self, key: &str) -> &mut HashMap<String, V> {
        let idx = shard_of(key, self.shards.len());
        &mut self.shards[idx]
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.shard(key).get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.shard_mut(key).get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shard(key).contains_key(key)
    }

    /// Insert or replace; returns the previous value.
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        self.shard_mut(&key).insert(key, value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.shard_mut(key).remove(key)
    }

    /// Keep only entries for which `keep` returns true; returns the removed keys.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str, &V) -> bool,
    {
        let mut removed = Vec::new();
        for shard in &mut self.shards {
            shard.retain(|k, v| {
                let kept = keep(k, v);
                if !kept {
                    removed.push(k.clone());
                }
                kept
            });
        }
        removed
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.shards.iter().flat_map(|s| s.values())
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(HashMap::is_empty)
    }

    pub fn clear(&mut self) {
        for shard in &mut self.shards {
            shard.clear();
        }
    }
}
