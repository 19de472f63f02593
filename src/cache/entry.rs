//! Cache Entry Types
//!
//! L1 entries: the cached value plus the bookkeeping eviction and expiry need.
//! Entries live only inside a [`LocalCache`](super::LocalCache) table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metadata for L1 entries.
///
/// Recency is tracked with a logical clock owned by the cache rather than wall
/// time, so two accesses never tie and victim selection is deterministic.
#[derive(Debug)]
pub struct EntryMetadata {
    /// Logical tick at insertion (unique per cache)
    sequence: u64,
    /// Logical tick of the most recent write or read
    last_access: AtomicU64,
    /// Number of reads plus the initial write
    access_count: AtomicU64,
    /// Wall-clock instant of insertion or last refresh
    written_at: Instant,
    /// Absolute expiry, if the cache expires after write
    expires_at: Option<Instant>,
}

impl EntryMetadata {
    /// Create new entry metadata
    pub fn new(sequence: u64, expire_after_write: Option<Duration>) -> Self {
        let written_at = Instant::now();
        Self {
            sequence,
            last_access: AtomicU64::new(sequence),
            access_count: AtomicU64::new(1),
            written_at,
            expires_at: expire_after_write.map(|ttl| written_at + ttl),
        }
    }

    /// Insertion tick
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Record an access at the given tick and return the new count
    #[inline]
    pub fn record_access(&self, tick: u64) -> u64 {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Tick of the last access
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Access count
    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Instant of insertion or last refresh
    #[inline]
    pub fn written_at(&self) -> Instant {
        self.written_at
    }

    /// Age since the last write
    #[inline]
    pub fn age(&self) -> Duration {
        self.written_at.elapsed()
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a given instant
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// L1 cache entry
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Entry metadata
    pub metadata: EntryMetadata,
    value: V,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry
    pub fn new(value: V, sequence: u64, expire_after_write: Option<Duration>) -> Self {
        Self {
            metadata: EntryMetadata::new(sequence, expire_after_write),
            value,
        }
    }

    /// Borrow the cached value
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Check if expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }
}

// =============================================================================
// Tests
// =============================================================================
