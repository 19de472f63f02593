//! Cache Key Types
//!
//! Namespaced keys that keep logically distinct regions apart when they share
//! one local table or one networked store.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Separator between namespace and key, and between composite key parts
pub const KEY_SEPARATOR: char = ':';

/// Cache key - a namespace paired with a key object.
///
/// Equality and hashing are structural over both fields, so identical key
/// objects under different namespaces never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey<K> {
    namespace: Arc<str>,
    key: K,
}

impl<K> CacheKey<K> {
    /// Create a new cache key
    pub fn new(namespace: impl Into<Arc<str>>, key: K) -> Self {
        Self {
            namespace: namespace.into(),
            key,
        }
    }

    /// Get the namespace
    #[inline]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get the key object
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Consume the key, returning the key object
    pub fn into_key(self) -> K {
        self.key
    }
}

impl CacheKey<String> {
    /// Build a composite key whose key object is the colon-joined parts.
    ///
    /// ```
    /// use tiercache::cache::CacheKey;
    ///
    /// let key = CacheKey::composite("sessions", &[&"eu-west", &42, &true]);
    /// assert_eq!(key.key(), "eu-west:42:true");
    /// ```
    pub fn composite(namespace: impl Into<Arc<str>>, parts: &[&dyn fmt::Display]) -> Self {
        let mut joined = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                joined.push(KEY_SEPARATOR);
            }
            joined.push_str(&part.to_string());
        }
        Self::new(namespace, joined)
    }

    /// Split a composite key object back into its parts
    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.key.split(KEY_SEPARATOR)
    }
}

impl<K: fmt::Display> fmt::Display for CacheKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, KEY_SEPARATOR, self.key)
    }
}

/// Build the networked-store key `"<cacheName>:<mappedKey>"`
#[inline]
pub fn namespaced(name: &str, mapped: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1 + mapped.len());
    out.push_str(name);
    out.push(KEY_SEPARATOR);
    out.push_str(mapped);
    out
}

/// Glob pattern matching every store key of a cache
#[inline]
pub fn namespace_pattern(name: &str) -> String {
    namespaced(name, "*")
}

// =============================================================================
// Tests
// =============================================================================
