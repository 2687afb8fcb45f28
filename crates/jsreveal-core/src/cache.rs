//! Bounded result cache keyed by content hash.
//!
//! The cache is not synchronized. A pipeline owns its cache and takes `&mut self` to use it, so
//! callers that share one pipeline across threads must put it behind a single lock.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hashes the analysed content together with the options that influence the output.
    pub fn from_parts(scope: &str, content: &str, fingerprint: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(scope.as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct CacheEntry<T> {
    value: Arc<T>,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Evicts in insertion order once `capacity` is exceeded. Lookups hand back the stored `Arc`, so a
/// repeat call for the same key observes the very same allocation.
pub struct ResultCache<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
    insertion_order: VecDeque<CacheKey>,
    capacity: usize,
    stats: CacheStatistics,
}

impl<T> ResultCache<T> {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            capacity: capacity.max(1),
            stats: CacheStatistics::default(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<T>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, value: T) -> Arc<T> {
        let value = Arc::new(value);

        if self.entries.contains_key(&key) {
            self.insertion_order.retain(|k| k != &key);
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                inserted_at: Utc::now(),
            },
        );
        self.insertion_order.push_back(key);
        self.evict_if_needed();

        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.stats.hits + self.stats.misses;
        if total == 0 {
            0.0
        } else {
            self.stats.hits as f64 / total as f64
        }
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.stats.evictions += 1;
                let age_ms = (Utc::now() - entry.inserted_at).num_milliseconds();
                debug!(key = %oldest.as_str(), age_ms, "evicted cached result");
            }
        }
    }
}

impl<T> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
