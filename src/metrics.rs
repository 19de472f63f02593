//! Prometheus exposition of cache statistics.
//!
//! Caches keep their own lock-free counters; the exporter only reads them.
//! Every scrape advances the `_total` counters to each source's running
//! totals, sets the entry gauges and encodes a private registry in the text
//! format.

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::{BusStats, CacheStats, DistributedCache, LocalCache};
use crate::error::{Error, Result};

/// Anything that can report cache statistics
pub trait StatsSource: Send + Sync {
    /// Label value for the `cache` label
    fn source_name(&self) -> &str;

    fn cache_stats(&self) -> CacheStats;

    /// Entries currently held in L1
    fn entries(&self) -> usize;

    fn bus_stats(&self) -> Option<BusStats> {
        None
    }

    fn write_failures(&self) -> u64 {
        0
    }
}

impl<K, V> StatsSource for DistributedCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn source_name(&self) -> &str {
        self.name()
    }

    fn cache_stats(&self) -> CacheStats {
        self.stats()
    }

    fn entries(&self) -> usize {
        self.local_size()
    }

    fn bus_stats(&self) -> Option<BusStats> {
        DistributedCache::bus_stats(self)
    }

    fn write_failures(&self) -> u64 {
        DistributedCache::write_failures(self)
    }
}

impl<K, V> StatsSource for LocalCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Send + Sync,
{
    fn source_name(&self) -> &str {
        self.name()
    }

    fn cache_stats(&self) -> CacheStats {
        self.stats()
    }

    fn entries(&self) -> usize {
        self.size()
    }
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels).map_err(metrics_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(metrics_error)?;
    Ok(gauge)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).map_err(metrics_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metrics_error)?;
    Ok(counter)
}

/// Move a counter up to a source's running total
fn advance(counter: &IntCounterVec, labels: &[&str], total: u64) {
    let counter = counter.with_label_values(labels);
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

/// Prometheus exporter for registered caches
pub struct MetricsExporter {
    registry: Registry,
    sources: RwLock<Vec<Arc<dyn StatsSource>>>,
    hits: IntCounterVec,
    misses: IntCounterVec,
    loads: IntCounterVec,
    evictions: IntCounterVec,
    entries: IntGaugeVec,
    bus_messages: IntCounterVec,
    write_failures: IntCounterVec,
    store_up: IntGauge,
}

impl MetricsExporter {
    /// Create an exporter with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let hits = counter_vec(&registry, "tiercache_l1_hits_total", "L1 cache hits", &["cache"])?;
        let misses = counter_vec(&registry, "tiercache_l1_misses_total", "L1 cache misses", &["cache"])?;
        let loads = counter_vec(
            &registry,
            "tiercache_l1_loads_total",
            "L1 populations from the networked store",
            &["cache"],
        )?;
        let evictions = counter_vec(
            &registry,
            "tiercache_l1_evictions_total",
            "L1 entries removed by size or expiry",
            &["cache"],
        )?;
        let entries = gauge_vec(&registry, "tiercache_l1_entries", "Entries held in L1", &["cache"])?;
        let bus_messages = counter_vec(
            &registry,
            "tiercache_invalidation_messages_total",
            "Invalidation messages by outcome",
            &["cache", "outcome"],
        )?;
        let write_failures = counter_vec(
            &registry,
            "tiercache_background_write_failures_total",
            "Asynchronous store writes that failed",
            &["cache"],
        )?;

        let store_up = IntGauge::new("tiercache_store_up", "Whether the networked store answered the last ping")
            .map_err(metrics_error)?;
        registry
            .register(Box::new(store_up.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            sources: RwLock::new(Vec::new()),
            hits,
            misses,
            loads,
            evictions,
            entries,
            bus_messages,
            write_failures,
            store_up,
        })
    }

    /// Add a source; its counters appear on the next refresh
    pub fn register_source(&self, source: Arc<dyn StatsSource>) {
        self.sources.write().push(source);
    }

    /// Number of registered sources
    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    pub fn set_store_up(&self, up: bool) {
        self.store_up.set(i64::from(up));
    }

    /// Bring every exported series up to date with its source
    pub fn refresh(&self) {
        for source in self.sources.read().iter() {
            let name = source.source_name();
            let stats = source.cache_stats();

            advance(&self.hits, &[name], stats.hits);
            advance(&self.misses, &[name], stats.misses);
            advance(&self.loads, &[name], stats.loads);
            advance(&self.evictions, &[name], stats.evictions);
            self.entries
                .with_label_values(&[name])
                .set(i64::try_from(source.entries()).unwrap_or(i64::MAX));
            advance(&self.write_failures, &[name], source.write_failures());

            if let Some(bus) = source.bus_stats() {
                for (outcome, value) in [
                    ("published", bus.published),
                    ("received", bus.received),
                    ("applied", bus.applied),
                    ("dropped", bus.dropped),
                ] {
                    advance(&self.bus_messages, &[name, outcome], value);
                }
            }
        }
    }

    /// Refresh and encode in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        self.refresh();

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics: {}", e)))
    }

    /// Content type of [`gather_text`](Self::gather_text) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}
