//! Write Policies
//!
//! How a write reaches the networked tier ([`SyncStrategy`]) and what value a
//! write actually persists ([`ConflictResolver`]).

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// Write propagation policy for the networked tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// The L2 write completes before `put` returns; failures surface
    #[default]
    Synchronous,
    /// The L2 write runs on a background task; failures are logged only
    Asynchronous,
}

impl SyncStrategy {
    /// Whether writes block the caller
    #[inline]
    pub fn is_synchronous(&self) -> bool {
        matches!(self, SyncStrategy::Synchronous)
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStrategy::Synchronous => write!(f, "synchronous"),
            SyncStrategy::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

/// Decides what a write persists given the value already cached.
///
/// Implementations must be pure functions of their two inputs. Returning
/// `None` suppresses the write entirely.
pub trait ConflictResolver<V>: Send + Sync {
    fn resolve(&self, existing: Option<&V>, incoming: V) -> Option<V>;
}

/// The incoming value always wins
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl<V> ConflictResolver<V> for LastWriteWins {
    fn resolve(&self, _existing: Option<&V>, incoming: V) -> Option<V> {
        Some(incoming)
    }
}

/// A present value is never overwritten; writes only fill absent keys
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWriteWins;

impl<V> ConflictResolver<V> for FirstWriteWins {
    fn resolve(&self, existing: Option<&V>, incoming: V) -> Option<V> {
        match existing {
            Some(_) => None,
            None => Some(incoming),
        }
    }
}

/// Resolver backed by a closure
pub struct FnResolver<V, F> {
    f: F,
    _marker: PhantomData<fn(V) -> V>,
}

impl<V, F> FnResolver<V, F>
where
    F: Fn(Option<&V>, V) -> Option<V> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<V, F> ConflictResolver<V> for FnResolver<V, F>
where
    F: Fn(Option<&V>, V) -> Option<V> + Send + Sync,
{
    fn resolve(&self, existing: Option<&V>, incoming: V) -> Option<V> {
        (self.f)(existing, incoming)
    }
}

// =============================================================================
// Tests
// =============================================================================
