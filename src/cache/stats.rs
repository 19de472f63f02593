//! Cache Statistics
//!
//! Lock-free counters recorded by L1 caches, and the immutable snapshot they
//! produce. Snapshots merge additively so a region can report one aggregate.

use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time cache statistics.
///
/// All counters are monotonically non-decreasing over a cache's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads answered from the cache
    pub hits: u64,
    /// Reads that found nothing (or only an expired entry)
    pub misses: u64,
    /// Entries populated from the networked tier after a miss
    pub loads: u64,
    /// Entries removed by size bound or expiry
    pub evictions: u64,
}

impl CacheStats {
    /// Empty statistics (returned when no L1 is configured)
    pub const fn empty() -> Self {
        Self {
            hits: 0,
            misses: 0,
            loads: 0,
            evictions: 0,
        }
    }

    /// Total reads
    pub fn request_count(&self) -> u64 {
        self.hits.saturating_add(self.misses)
    }

    /// Hit ratio (1.0 when no requests were made)
    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Miss ratio (0.0 when no requests were made)
    pub fn miss_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Combine two snapshots additively
    pub fn merge(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits.saturating_add(other.hits),
            misses: self.misses.saturating_add(other.misses),
            loads: self.loads.saturating_add(other.loads),
            evictions: self.evictions.saturating_add(other.evictions),
        }
    }
}

impl Add for CacheStats {
    type Output = CacheStats;

    fn add(self, rhs: CacheStats) -> CacheStats {
        self.merge(&rhs)
    }
}

impl std::iter::Sum for CacheStats {
    fn sum<I: Iterator<Item = CacheStats>>(iter: I) -> Self {
        iter.fold(CacheStats::empty(), |acc, s| acc.merge(&s))
    }
}

/// Atomic counters behind [`CacheStats`]
#[derive(Debug, Default)]
pub struct StatsCounter {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCounter {
    /// Create a counter; a disabled counter records nothing
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    /// Whether recording is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_load(&self) {
        if self.enabled {
            self.loads.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_evictions(&self, count: u64) {
        if self.enabled && count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
