//! tiercache - Distributed Two-Tier Cache
//!
//! A bounded in-process cache (L1) in front of a shared networked key/value
//! store (L2), kept consistent across independent processes by best-effort
//! publish/subscribe invalidation.
//!
//! # Architecture
//!
//! ```text
//! Caller → DistributedCache → LocalCache (L1) → NetworkedStore (L2)
//!                 ↕
//!          InvalidationBus (pub/sub) ↔ peer processes
//! ```
//!
//! # Features
//!
//! - Read-through with L1 population, write-through per sync strategy
//! - Pluggable conflict resolution and eviction policies
//! - Targeted cross-process invalidation via reversible key encoding
//! - Regions grouping L1 caches under shared defaults
//! - In-memory and Redis (`redis` feature) store bindings
//! - Prometheus exposition of cache statistics
//!
//! # Modules
//!
//! - [`cache`] - L1, coordinator, invalidation, policies, codecs
//! - [`config`] - Node configuration file
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus exporter
//! - [`store`] - Networked store trait and bindings

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use cache::{
    CacheKey, CacheRegion, CacheStats, ConflictResolver, DistributedCache, DistributedCacheConfig,
    InvalidationConfig, LocalCache, LocalCacheConfig, LocalTier, SyncStrategy,
};
pub use error::{Error, Result};
pub use metrics::MetricsExporter;
pub use store::{InMemoryStore, NetworkedStore, Subscription};
