//! tiercache Integration Tests
//!
//! End-to-end behaviour of the two-tier cache against the in-memory store:
//! - Read-through and write propagation
//! - Conflict resolution
//! - Cross-instance invalidation over a shared bus
//! - Regions, expiry and statistics

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tiercache::cache::{
    display_key_mapper, CacheRegion, DistributedCache, DistributedCacheConfig, FnResolver,
    InvalidationConfig, JsonCodec, JsonKeyCodec, LocalCacheConfig, LocalTier, Lz4Codec,
    StringKeyCodec, SyncStrategy,
};
use tiercache::store::{InMemoryStore, NetworkedStore};

fn key(s: &str) -> String {
    s.to_string()
}

fn bounded(max_size: usize) -> LocalTier<String, u32> {
    LocalTier::Owned(LocalCacheConfig {
        max_size,
        ..Default::default()
    })
}

fn players_config(store: Arc<InMemoryStore>) -> DistributedCacheConfig<String, u32> {
    DistributedCacheConfig::new(
        "players",
        store,
        Arc::new(JsonCodec::<u32>::new()),
        display_key_mapper(),
    )
}

/// Poll until `condition` holds; bus delivery is asynchronous
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// Two-Tier Read/Write
// =============================================================================

mod tier_tests {
    use super::*;

    #[tokio::test]
    async fn test_read_through_leaves_key_in_l1() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set("players:steve", Bytes::from_static(b"12"))
            .await
            .unwrap();

        let cache = DistributedCache::new(players_config(store.clone()))
            .await
            .unwrap();
        let local = cache.local().unwrap();
        assert!(!local.contains(&key("steve")));

        assert_eq!(cache.get(&key("steve")).await.unwrap(), Some(12));
        assert!(local.contains(&key("steve")));
    }

    #[tokio::test]
    async fn test_synchronous_put_visible_in_store_on_return() {
        let store = Arc::new(InMemoryStore::new());
        let cache = DistributedCache::new(players_config(store.clone()))
            .await
            .unwrap();

        cache.put(key("steve"), 99).await.unwrap();
        assert_eq!(
            store.get("players:steve").await.unwrap(),
            Some(Bytes::from_static(b"99"))
        );
    }

    #[tokio::test]
    async fn test_players_bounded_scenario() {
        let store = Arc::new(InMemoryStore::new());
        let cache = DistributedCache::new(players_config(store.clone()).with_local(bounded(2)))
            .await
            .unwrap();
        let local = cache.local().unwrap().clone();

        cache.put(key("a"), 1).await.unwrap();
        cache.put(key("b"), 2).await.unwrap();
        cache.put(key("c"), 3).await.unwrap();

        // LRU: "a" was least recently used
        assert_eq!(local.size(), 2);
        assert!(!local.contains(&key("a")));
        assert!(local.contains(&key("b")));
        assert!(local.contains(&key("c")));

        // The evicted key is still served by L2 and repopulates L1
        assert_eq!(cache.get(&key("a")).await.unwrap(), Some(1));
        assert_eq!(local.size(), 2);
        assert!(local.contains(&key("a")));
        assert!(!local.contains(&key("b")));
        assert!(local.contains(&key("c")));

        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.evictions, 2);
    }

    #[tokio::test]
    async fn test_asynchronous_put_reaches_store_after_flush() {
        let store = Arc::new(InMemoryStore::new());
        let cache = DistributedCache::new(
            players_config(store.clone()).with_sync_strategy(SyncStrategy::Asynchronous),
        )
        .await
        .unwrap();
        assert!(!cache.sync_strategy().is_synchronous());

        for i in 0..20u32 {
            cache.put(format!("p{}", i), i).await.unwrap();
        }
        cache.flush().await;

        for i in 0..20u32 {
            assert!(store.contains_key(&format!("players:p{}", i)));
        }
        assert_eq!(cache.write_failures(), 0);
    }

    #[tokio::test]
    async fn test_compressed_values_round_trip_through_store() {
        let store = Arc::new(InMemoryStore::new());
        let cache: DistributedCache<String, String> = DistributedCache::new(
            DistributedCacheConfig::new(
                "docs",
                store.clone(),
                Arc::new(Lz4Codec::new(JsonCodec::<String>::new(), 64)),
                display_key_mapper(),
            )
            .with_local(LocalTier::Disabled),
        )
        .await
        .unwrap();

        let body = "lorem ipsum ".repeat(200);
        cache.put(key("readme"), body.clone()).await.unwrap();

        let stored = store.get("docs:readme").await.unwrap().unwrap();
        assert!(stored.len() < body.len());
        assert_eq!(cache.get(&key("readme")).await.unwrap(), Some(body));
    }
}

// =============================================================================
// Conflict Resolution
// =============================================================================

mod resolver_tests {
    use super::*;

    #[tokio::test]
    async fn test_suppressed_write_changes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let seed = DistributedCache::new(players_config(store.clone()))
            .await
            .unwrap();
        seed.put(key("steve"), 1).await.unwrap();

        let cache = DistributedCache::new(
            players_config(store.clone())
                .with_conflict_resolver(Arc::new(FnResolver::new(|_: Option<&u32>, _: u32| None))),
        )
        .await
        .unwrap();

        assert!(!cache.put(key("steve"), 2).await.unwrap());
        assert!(!cache.local().unwrap().contains(&key("steve")));
        assert_eq!(seed.get(&key("steve")).await.unwrap(), Some(1));
        assert_eq!(
            store.get("players:steve").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );
    }

    #[tokio::test]
    async fn test_resolver_sees_value_from_other_instance() {
        let store = Arc::new(InMemoryStore::new());
        let writer = DistributedCache::new(players_config(store.clone()))
            .await
            .unwrap();
        writer.put(key("steve"), 10).await.unwrap();

        // Keep the larger score
        let max = FnResolver::new(|existing: Option<&u32>, incoming: u32| match existing {
            Some(current) if *current >= incoming => None,
            _ => Some(incoming),
        });
        let cache = DistributedCache::new(players_config(store.clone()).with_conflict_resolver(Arc::new(max)))
            .await
            .unwrap();

        assert!(!cache.put(key("steve"), 5).await.unwrap());
        assert!(cache.put(key("steve"), 15).await.unwrap());
        assert_eq!(writer.local().unwrap().get(&key("steve")), Some(10));
        assert_eq!(
            store.get("players:steve").await.unwrap(),
            Some(Bytes::from_static(b"15"))
        );
    }
}

// =============================================================================
// Cross-Instance Invalidation
// =============================================================================

mod invalidation_tests {
    use super::*;

    async fn instance(store: Arc<InMemoryStore>, server_id: &str) -> DistributedCache<String, u32> {
        DistributedCache::new(
            players_config(store)
                .with_invalidation(InvalidationConfig::new(server_id, Arc::new(StringKeyCodec))),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalidation_locality() {
        let store = Arc::new(InMemoryStore::new());
        let cache = instance(store.clone(), "node-a").await;

        cache.put(key("steve"), 1).await.unwrap();
        assert!(cache.invalidate(&key("steve")).await.unwrap());

        assert!(!cache.local().unwrap().contains(&key("steve")));
        assert!(!store.contains_key("players:steve"));
        assert_eq!(cache.get(&key("steve")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidation_reaches_peer_l1() {
        let store = Arc::new(InMemoryStore::new());
        let a = instance(store.clone(), "node-a").await;
        let b = instance(store.clone(), "node-b").await;

        a.put(key("steve"), 1).await.unwrap();
        a.put(key("alex"), 2).await.unwrap();
        assert_eq!(b.get(&key("steve")).await.unwrap(), Some(1));
        assert_eq!(b.get(&key("alex")).await.unwrap(), Some(2));

        a.invalidate(&key("steve")).await.unwrap();

        let b_local = b.local().unwrap().clone();
        assert!(eventually(|| !b_local.contains(&key("steve"))).await);
        // Targeted: the other key survives
        assert!(b_local.contains(&key("alex")));
        assert_eq!(b.get(&key("steve")).await.unwrap(), None);

        let bus = b.bus_stats().unwrap();
        assert_eq!(bus.applied, 1);
        assert_eq!(bus.dropped, 0);
    }

    #[tokio::test]
    async fn test_peer_rereads_fresh_value_after_invalidation() {
        let store = Arc::new(InMemoryStore::new());
        let a = instance(store.clone(), "node-a").await;
        let b = instance(store.clone(), "node-b").await;

        a.put(key("steve"), 1).await.unwrap();
        assert_eq!(b.get(&key("steve")).await.unwrap(), Some(1));

        // A writes a new value and announces it; B must not serve its stale copy
        a.invalidate(&key("steve")).await.unwrap();
        a.put(key("steve"), 2).await.unwrap();

        let b_local = b.local().unwrap().clone();
        assert!(eventually(|| b.bus_stats().map_or(0, |s| s.applied) == 1).await);
        assert!(!b_local.contains(&key("steve")));
        assert_eq!(b.get(&key("steve")).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_batch_invalidation_is_targeted() {
        let store = Arc::new(InMemoryStore::new());
        let a = instance(store.clone(), "node-a").await;
        let b = instance(store.clone(), "node-b").await;

        for (k, v) in [("x", 1), ("y", 2), ("z", 3)] {
            a.put(key(k), v).await.unwrap();
            b.get(&key(k)).await.unwrap();
        }

        assert_eq!(a.invalidate_many(vec![key("x"), key("y")]).await.unwrap(), 2);

        let b_local = b.local().unwrap().clone();
        assert!(eventually(|| b_local.size() == 1).await);
        assert!(b_local.contains(&key("z")));
        assert_eq!(a.bus_stats().unwrap().published, 1);
    }

    #[tokio::test]
    async fn test_invalidate_all_is_scoped_to_region() {
        let store = Arc::new(InMemoryStore::new());
        let a = instance(store.clone(), "node-a").await;
        let b = instance(store.clone(), "node-b").await;
        let b_guilds: DistributedCache<String, u32> = DistributedCache::new(
            DistributedCacheConfig::new(
                "guilds",
                store.clone(),
                Arc::new(JsonCodec::<u32>::new()),
                display_key_mapper(),
            )
            .with_invalidation(InvalidationConfig::new("node-b", Arc::new(StringKeyCodec))),
        )
        .await
        .unwrap();

        a.put(key("steve"), 1).await.unwrap();
        b.get(&key("steve")).await.unwrap();
        b_guilds.put(key("builders"), 7).await.unwrap();

        a.invalidate_all().await.unwrap();

        let b_local = b.local().unwrap().clone();
        assert!(eventually(|| b_local.is_empty()).await);
        assert!(b_guilds.local().unwrap().contains(&key("builders")));
        assert!(store.contains_key("guilds:builders"));
        assert!(!store.contains_key("players:steve"));
    }

    #[tokio::test]
    async fn test_typed_keys_survive_the_wire() {
        let store = Arc::new(InMemoryStore::new());
        let build = |server_id: &'static str| {
            let store = store.clone();
            async move {
                DistributedCache::<(u32, String), u32>::new(
                    DistributedCacheConfig::new(
                        "scores",
                        store,
                        Arc::new(JsonCodec::<u32>::new()),
                        Arc::new(|k: &(u32, String)| format!("{}:{}", k.0, k.1)),
                    )
                    .with_invalidation(InvalidationConfig::new(
                        server_id,
                        Arc::new(JsonKeyCodec::<(u32, String)>::new()),
                    )),
                )
                .await
                .unwrap()
            }
        };
        let a = build("node-a").await;
        let b = build("node-b").await;

        let season1 = (1, key("steve"));
        let season2 = (2, key("steve"));
        a.put(season1.clone(), 10).await.unwrap();
        a.put(season2.clone(), 20).await.unwrap();
        b.get(&season1).await.unwrap();
        b.get(&season2).await.unwrap();

        a.invalidate(&season1).await.unwrap();

        let b_local = b.local().unwrap().clone();
        assert!(eventually(|| !b_local.contains(&season1)).await);
        assert!(b_local.contains(&season2));
    }

    #[tokio::test]
    async fn test_unsubscribed_peer_keeps_stale_copy_until_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let a = instance(store.clone(), "node-a").await;
        let b = DistributedCache::new(players_config(store.clone()).with_local(LocalTier::Owned(
            LocalCacheConfig {
                expire_after_write: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )))
        .await
        .unwrap();

        a.put(key("steve"), 1).await.unwrap();
        assert_eq!(b.get(&key("steve")).await.unwrap(), Some(1));

        a.invalidate(&key("steve")).await.unwrap();
        // No bus on B: its L1 copy is stale until it expires
        assert_eq!(b.get(&key("steve")).await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(b.get(&key("steve")).await.unwrap(), None);
    }
}

// =============================================================================
// Regions, Expiry and Statistics
// =============================================================================

mod region_tests {
    use super::*;

    #[tokio::test]
    async fn test_region_owned_l1_backs_distributed_cache() {
        let store = Arc::new(InMemoryStore::new());
        let region = Arc::new(
            CacheRegion::new(
                "game",
                LocalCacheConfig {
                    max_size: 100,
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let players = DistributedCache::new(
            players_config(store.clone())
                .with_local(LocalTier::Shared(region.cache::<String, u32>("players").unwrap())),
        )
        .await
        .unwrap();

        players.put(key("steve"), 1).await.unwrap();
        players.get(&key("steve")).await.unwrap();
        assert_eq!(region.total_entries(), 1);
        assert_eq!(region.stats().hits, 1);

        region.invalidate_all();
        assert_eq!(players.local_size(), 0);
        // L2 still holds the value
        assert_eq!(players.get(&key("steve")).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_l1_expiry_regardless_of_pressure() {
        let store = Arc::new(InMemoryStore::new());
        let cache = DistributedCache::new(players_config(store.clone()).with_local(
            LocalTier::Owned(LocalCacheConfig {
                max_size: 1000,
                expire_after_write: Some(Duration::from_millis(30)),
                ..Default::default()
            }),
        ))
        .await
        .unwrap();

        cache.put(key("steve"), 1).await.unwrap();
        let local = cache.local().unwrap();
        assert_eq!(local.get(&key("steve")), Some(1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(local.get(&key("steve")), None);
    }

    #[tokio::test]
    async fn test_hits_plus_misses_equals_gets() {
        let store = Arc::new(InMemoryStore::new());
        let cache = DistributedCache::new(players_config(store.clone()).with_local(bounded(3)))
            .await
            .unwrap();

        let mut gets = 0u64;
        let mut previous = cache.stats();
        for i in 0..50u32 {
            let k = format!("k{}", i % 7);
            if i % 3 == 0 {
                cache.put(k.clone(), i).await.unwrap();
            }
            cache.get(&k).await.unwrap();
            gets += 1;

            let current = cache.stats();
            assert!(current.hits >= previous.hits);
            assert!(current.misses >= previous.misses);
            previous = current;
        }

        assert_eq!(previous.hits + previous.misses, gets);
        assert_eq!(previous.request_count(), gets);
    }

    #[tokio::test]
    async fn test_store_outage_split_by_strategy() {
        let store = Arc::new(InMemoryStore::new());
        let sync_cache = DistributedCache::new(players_config(store.clone()))
            .await
            .unwrap();
        let async_cache = DistributedCache::new(
            DistributedCacheConfig::new(
                "sessions",
                store.clone(),
                Arc::new(JsonCodec::<u32>::new()),
                display_key_mapper::<String>(),
            )
            .with_sync_strategy(SyncStrategy::Asynchronous),
        )
        .await
        .unwrap();

        store.set_available(false);

        let err = sync_cache.put(key("steve"), 1).await.unwrap_err();
        assert!(err.is_store_unavailable());

        assert!(async_cache.put(key("s1"), 1).await.unwrap());
        async_cache.flush().await;
        assert_eq!(async_cache.write_failures(), 1);
        // L1 updated, L2 stale
        assert_eq!(async_cache.get(&key("s1")).await.unwrap(), Some(1));
    }
}
