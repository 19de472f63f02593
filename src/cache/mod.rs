//! Two-tier cache
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    DistributedCache                      │
//! │   resolver ─► L1 (LocalCache) ─► L2 (NetworkedStore)     │
//! └───────────────┬──────────────────────────┬───────────────┘
//!                 │ evict                    │ publish
//!                 ▼                          ▼
//!         InvalidationBus ◄──── pub/sub channel ────► peers
//! ```
//!
//! - [`LocalCache`]: bounded in-process tier with pluggable eviction
//! - [`DistributedCache`]: read-through/write-through coordinator
//! - [`InvalidationBus`]: cross-process eviction announcements
//! - [`CacheRegion`]: named group of L1 caches sharing defaults

pub mod codec;
pub mod distributed;
pub mod entry;
pub mod eviction;
pub mod invalidation;
pub mod key;
pub mod local;
pub mod policy;
pub mod region;
pub mod stats;

#[cfg(test)]
mod proptest;

pub use codec::{JsonCodec, JsonKeyCodec, KeyCodec, Lz4Codec, StringKeyCodec, ValueCodec};
pub use distributed::{
    display_key_mapper, DistributedCache, DistributedCacheConfig, InvalidationConfig, KeyMapper,
    LocalTier,
};
pub use entry::{CacheEntry, EntryMetadata};
pub use eviction::{EvictionPolicy, EvictionPolicyKind, EvictionRank, Fifo, Lfu, Lru};
pub use invalidation::{
    process_server_id, BusStats, InvalidationBus, InvalidationMessage, InvalidationScope,
    DEFAULT_INVALIDATION_CHANNEL,
};
pub use key::{namespace_pattern, namespaced, CacheKey, KEY_SEPARATOR};
pub use local::{LocalCache, LocalCacheConfig};
pub use policy::{ConflictResolver, FirstWriteWins, FnResolver, LastWriteWins, SyncStrategy};
pub use region::CacheRegion;
pub use stats::{CacheStats, StatsCounter};

/// Default L1 entry bound
pub const DEFAULT_L1_MAX_SIZE: usize = 10_000;

/// Optional durations as fractional seconds (`expire_after_write: 1.5`)
pub(crate) mod duration_secs_opt {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}
