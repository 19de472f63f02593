//! Cache Eviction Policies
//!
//! Strategy for choosing which L1 entry to drop when an insertion would exceed
//! the size bound. Policies only rank entries; the cache scans its table and
//! evicts the entry with the lowest rank. Ties are broken by the entry's
//! insertion sequence, which is unique, so the victim is always deterministic.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::entry::EntryMetadata;

/// Eviction rank; lower ranks are evicted first
pub type EvictionRank = (u64, u64);

/// Eviction policy strategy
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Policy name (for logs and metrics)
    fn name(&self) -> &'static str;

    /// Rank an entry; the lowest-ranked entry becomes the victim
    fn rank(&self, metadata: &EntryMetadata) -> EvictionRank;
}

/// Least recently used: the entry whose last read or write is oldest
#[derive(Debug, Clone, Copy, Default)]
pub struct Lru;

impl EvictionPolicy for Lru {
    fn name(&self) -> &'static str {
        "LRU"
    }

    fn rank(&self, metadata: &EntryMetadata) -> EvictionRank {
        (metadata.last_access(), 0)
    }
}

/// Least frequently used, falling back to recency between equal counts
#[derive(Debug, Clone, Copy, Default)]
pub struct Lfu;

impl EvictionPolicy for Lfu {
    fn name(&self) -> &'static str {
        "LFU"
    }

    fn rank(&self, metadata: &EntryMetadata) -> EvictionRank {
        (metadata.access_count(), metadata.last_access())
    }
}

/// First in, first out: the oldest insertion regardless of reads
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl EvictionPolicy for Fifo {
    fn name(&self) -> &'static str {
        "FIFO"
    }

    fn rank(&self, metadata: &EntryMetadata) -> EvictionRank {
        (metadata.sequence(), 0)
    }
}

/// Built-in policy selector used by configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicyKind {
    #[default]
    Lru,
    Lfu,
    Fifo,
}

impl EvictionPolicyKind {
    /// Instantiate the policy
    pub fn build(self) -> Arc<dyn EvictionPolicy> {
        match self {
            EvictionPolicyKind::Lru => Arc::new(Lru),
            EvictionPolicyKind::Lfu => Arc::new(Lfu),
            EvictionPolicyKind::Fifo => Arc::new(Fifo),
        }
    }
}

impl fmt::Display for EvictionPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.build().name())
    }
}

// =============================================================================
// Tests
// =============================================================================
