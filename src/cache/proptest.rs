//! Property-Based Tests for the L1 cache
//!
//! # Test Properties
//!
//! 1. **Bound**: the table never holds more than `max_size` entries
//! 2. **Stats accounting**: counters never decrease; `hits + misses` equals
//!    the number of `get` calls
//! 3. **Determinism**: the same operation sequence leaves the same keys
//! 4. **Namespace isolation**: equal key objects in different namespaces are
//!    independent entries
//! 5. **Reversible keys**: invalidation key encodings decode to the same key
//! 6. **Read-your-writes**: after a synchronous put, every instance sharing the
//!    store reads the last written value

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use super::codec::{JsonCodec, JsonKeyCodec, KeyCodec};
use super::distributed::{display_key_mapper, DistributedCache, DistributedCacheConfig, LocalTier};
use super::eviction::EvictionPolicyKind;
use super::key::CacheKey;
use super::local::{LocalCache, LocalCacheConfig};
use super::stats::CacheStats;
use crate::store::InMemoryStore;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u32),
    Get(u8),
    Invalidate(u8),
}

/// Small key space so operations collide often
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..24, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        4 => (0u8..24).prop_map(Op::Get),
        1 => (0u8..24).prop_map(Op::Invalidate),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..300)
}

fn policy_strategy() -> impl Strategy<Value = EvictionPolicyKind> {
    prop_oneof![
        Just(EvictionPolicyKind::Lru),
        Just(EvictionPolicyKind::Lfu),
        Just(EvictionPolicyKind::Fifo),
    ]
}

fn cache(max_size: usize, eviction: EvictionPolicyKind) -> LocalCache<u8, u32> {
    LocalCache::new(
        "prop",
        LocalCacheConfig {
            max_size,
            eviction,
            ..Default::default()
        },
    )
    .unwrap()
}

fn apply(cache: &LocalCache<u8, u32>, op: &Op) {
    match op {
        Op::Put(k, v) => cache.put(*k, *v),
        Op::Get(k) => {
            cache.get(k);
        }
        Op::Invalidate(k) => {
            cache.invalidate(k);
        }
    }
}

fn monotonic(before: &CacheStats, after: &CacheStats) -> bool {
    after.hits >= before.hits
        && after.misses >= before.misses
        && after.loads >= before.loads
        && after.evictions >= before.evictions
}

// =============================================================================
// L1 Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: no operation sequence pushes the table past its bound.
    #[test]
    fn prop_size_never_exceeds_bound(
        max_size in 1usize..8,
        eviction in policy_strategy(),
        ops in ops_strategy(),
    ) {
        let cache = cache(max_size, eviction);
        for op in &ops {
            apply(&cache, op);
            prop_assert!(cache.size() <= max_size);
        }
    }

    /// Property: counters only grow and every get is a hit or a miss.
    #[test]
    fn prop_stats_are_monotonic_and_complete(
        eviction in policy_strategy(),
        ops in ops_strategy(),
    ) {
        let cache = cache(4, eviction);
        let mut gets = 0u64;
        let mut previous = cache.stats();

        for op in &ops {
            apply(&cache, op);
            if matches!(op, Op::Get(_)) {
                gets += 1;
            }
            let current = cache.stats();
            prop_assert!(monotonic(&previous, &current));
            previous = current;
        }

        prop_assert_eq!(previous.hits + previous.misses, gets);
    }

    /// Property: victim selection is a pure function of the operation history.
    #[test]
    fn prop_eviction_is_deterministic(
        eviction in policy_strategy(),
        ops in ops_strategy(),
    ) {
        let first = cache(3, eviction);
        let second = cache(3, eviction);
        for op in &ops {
            apply(&first, op);
            apply(&second, op);
        }

        let mut a = first.keys();
        let mut b = second.keys();
        a.sort();
        b.sort();
        prop_assert_eq!(a, b);
        prop_assert_eq!(first.stats(), second.stats());
    }

    /// Property: the most recent insertion always survives its own eviction.
    #[test]
    fn prop_new_insertion_survives(
        eviction in policy_strategy(),
        ops in ops_strategy(),
        key in 0u8..24,
    ) {
        let cache = cache(2, eviction);
        for op in &ops {
            apply(&cache, op);
        }
        cache.put(key, 1);
        prop_assert!(cache.contains(&key));
    }
}

// =============================================================================
// Key Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: invalidating in one namespace never touches another.
    #[test]
    fn prop_namespaces_are_isolated(
        keys in prop::collection::vec("[a-z]{1,6}", 1..20),
        drop_index in any::<prop::sample::Index>(),
    ) {
        let cache: LocalCache<CacheKey<String>, usize> =
            LocalCache::new("shared", LocalCacheConfig::default()).unwrap();

        for (i, key) in keys.iter().enumerate() {
            cache.put(CacheKey::new("players", key.clone()), i);
            cache.put(CacheKey::new("guilds", key.clone()), i);
        }

        let dropped = drop_index.get(&keys).clone();
        cache.invalidate(&CacheKey::new("players", dropped.clone()));

        prop_assert!(!cache.contains(&CacheKey::new("players", dropped.clone())));
        for key in &keys {
            prop_assert!(cache.contains(&CacheKey::new("guilds", key.clone())));
        }
    }

    /// Property: keys carried by invalidation messages decode to the original.
    #[test]
    fn prop_key_encoding_is_reversible(
        namespace in "[a-z]{1,8}",
        key in "\\PC{0,24}",
    ) {
        let codec = JsonKeyCodec::<CacheKey<String>>::new();
        let original = CacheKey::new(namespace, key);

        let encoded = codec.encode(&original)?;
        prop_assert_eq!(codec.decode(&encoded)?, original);
    }
}

// =============================================================================
// Coordinator Properties
// =============================================================================

fn distributed(
    store: &Arc<InMemoryStore>,
    local: LocalTier<u8, u32>,
) -> DistributedCacheConfig<u8, u32> {
    DistributedCacheConfig::new(
        "prop",
        store.clone(),
        Arc::new(JsonCodec::<u32>::new()),
        display_key_mapper(),
    )
    .with_local(local)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: synchronous writes are visible to this instance and to a
    /// peer reading straight from the store.
    #[test]
    fn prop_sync_put_is_read_back(
        writes in prop::collection::vec((0u8..16, any::<u32>()), 1..60),
    ) {
        tokio_test::block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let cache = DistributedCache::new(distributed(
                &store,
                LocalTier::Owned(LocalCacheConfig {
                    max_size: 4,
                    ..Default::default()
                }),
            ))
            .await?;
            let peer = DistributedCache::new(distributed(&store, LocalTier::Disabled)).await?;

            let mut expected = HashMap::new();
            for (key, value) in &writes {
                prop_assert!(cache.put(*key, *value).await?);
                expected.insert(*key, *value);
            }

            for (key, value) in &expected {
                prop_assert_eq!(cache.get(key).await?, Some(*value));
                prop_assert_eq!(peer.get(key).await?, Some(*value));
            }
            prop_assert!(cache.local_size() <= 4);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
