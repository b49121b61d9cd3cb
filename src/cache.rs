// ⚡ Score Cache - LRU memoization for normalization and pair similarity
// Pure optimization: every lookup falls back to the same computation.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::normalize::normalize_field;
use crate::record::Field;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub normalization_hits: u64,
    pub normalization_misses: u64,
    pub similarity_hits: u64,
    pub similarity_misses: u64,
}

impl CacheStats {
    pub fn similarity_hit_rate(&self) -> f64 {
        let total = self.similarity_hits + self.similarity_misses;
        if total == 0 {
            0.0
        } else {
            self.similarity_hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    norm_hits: AtomicU64,
    norm_misses: AtomicU64,
    sim_hits: AtomicU64,
    sim_misses: AtomicU64,
}

/// Order-independent key for a pair of normalized values.
///
/// The two strings are sorted before hashing so (a, b) and (b, a) collide.
pub fn pair_key(metric: &str, a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(metric.as_bytes());
    hasher.update([0x1f]);
    hasher.update(lo.as_bytes());
    hasher.update([0x1f]);
    hasher.update(hi.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ScoreCache {
    normalized: Option<Cache<(Field, String), String>>,
    similarity: Option<Cache<(Field, String), f64>>,
    counters: Counters,
}

impl ScoreCache {
    pub fn new(normalization_capacity: u64, similarity_capacity: u64) -> Self {
        let normalized = Cache::builder()
            .max_capacity(normalization_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        let similarity = Cache::builder()
            .max_capacity(similarity_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        ScoreCache {
            normalized: Some(normalized),
            similarity: Some(similarity),
            counters: Counters::default(),
        }
    }

    /// A cache that always recomputes.
    pub fn disabled() -> Self {
        ScoreCache {
            normalized: None,
            similarity: None,
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.normalized.is_some()
    }

    /// Normalized value of `raw` for `field`.
    pub fn normalize(&self, field: Field, raw: &str) -> String {
        let Some(cache) = &self.normalized else {
            return normalize_field(field, raw);
        };

        let key = (field, raw.to_string());
        if let Some(hit) = cache.get(&key) {
            self.counters.norm_hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        self.counters.norm_misses.fetch_add(1, Ordering::Relaxed);
        let value = normalize_field(field, raw);
        cache.insert(key, value.clone());
        value
    }

    /// Memoized similarity of two normalized values. `compute` always receives
    /// the pair in sorted order so cached and fresh results agree.
    pub fn similarity<F>(&self, field: Field, metric: &str, a: &str, b: &str, compute: F) -> f64
    where
        F: FnOnce(&str, &str) -> f64,
    {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

        let Some(cache) = &self.similarity else {
            return compute(lo, hi);
        };

        let key = (field, pair_key(metric, lo, hi));
        if let Some(hit) = cache.get(&key) {
            self.counters.sim_hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }

        self.counters.sim_misses.fetch_add(1, Ordering::Relaxed);
        let value = compute(lo, hi);
        cache.insert(key, value);
        value
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            normalization_hits: self.counters.norm_hits.load(Ordering::Relaxed),
            normalization_misses: self.counters.norm_misses.load(Ordering::Relaxed),
            similarity_hits: self.counters.sim_hits.load(Ordering::Relaxed),
            similarity_misses: self.counters.sim_misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.normalized {
            cache.invalidate_all();
        }
        if let Some(cache) = &self.similarity {
            cache.invalidate_all();
        }
    }
}

impl Default for ScoreCache {
    fn default() -> Self {
        ScoreCache::new(10_000, 50_000)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(pair_key("levenshtein", "a", "b"), pair_key("levenshtein", "b", "a"));
        assert_ne!(pair_key("levenshtein", "a", "b"), pair_key("exact", "a", "b"));
    }

    #[test]
    fn test_similarity_hits_for_swapped_pair() {
        let cache = ScoreCache::new(10, 10);

        let first = cache.similarity(Field::Name, "m", "x", "y", |_, _| 0.5);
        let second = cache.similarity(Field::Name, "m", "y", "x", |_, _| 0.9);

        assert_eq!(first, 0.5);
        assert_eq!(second, 0.5);
        let stats = cache.stats();
        assert_eq!(stats.similarity_hits, 1);
        assert_eq!(stats.similarity_misses, 1);
    }

    #[test]
    fn test_normalize_cached_matches_uncached() {
        let cache = ScoreCache::new(10, 10);
        let disabled = ScoreCache::disabled();

        for _ in 0..2 {
            assert_eq!(
                cache.normalize(Field::Address, "123 Main Street"),
                disabled.normalize(Field::Address, "123 Main Street")
            );
        }
        assert_eq!(cache.stats().normalization_hits, 1);
        assert_eq!(disabled.stats(), CacheStats::default());
    }

    #[test]
    fn test_compute_receives_sorted_pair() {
        let cache = ScoreCache::disabled();
        let seen = cache.similarity(Field::City, "m", "zeta", "alpha", |lo, _| {
            if lo == "alpha" { 1.0 } else { 0.0 }
        });
        assert_eq!(seen, 1.0);
    }

    #[test]
    fn test_clear_drops_entries() {
        let cache = ScoreCache::new(10, 10);
        cache.similarity(Field::Zip, "exact", "1", "2", |_, _| 0.0);
        cache.clear();
        let value = cache.similarity(Field::Zip, "exact", "1", "2", |_, _| 0.25);
        assert_eq!(value, 0.25);
    }
}
