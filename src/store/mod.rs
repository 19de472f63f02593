//! Networked Store (L2) Bindings
//!
//! The shared key/value tier behind every L1 cache. The cache layer only
//! consumes this narrow interface; connection pooling, persistence and
//! clustering belong to the store itself.
//!
//! # Bindings
//!
//! - [`InMemoryStore`] - process-local store with broadcast pub/sub, used by
//!   tests and single-node deployments
//! - `RedisStore` - Redis via `deadpool-redis` (feature `redis`)
//!
//! All keys crossing this boundary are pre-namespaced (`"<cache>:<key>"`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

mod glob;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use glob::glob_match;
pub use memory::{InMemoryStore, InMemoryStoreStats};
#[cfg(feature = "redis")]
pub use self::redis::{RedisStore, RedisStoreConfig};

/// Callback invoked once per message received on a subscribed channel.
///
/// Runs on the binding's listener task and must not block indefinitely.
pub type MessageHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Networked key/value store with publish/subscribe
#[async_trait]
pub trait NetworkedStore: Send + Sync {
    /// Get a payload
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set a payload without expiry
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Set a payload that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern; returns the count removed
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64>;

    /// Publish a message to a channel
    async fn publish(&self, channel: &str, message: Bytes) -> Result<()>;

    /// Subscribe to a channel; the returned handle stops delivery when
    /// cancelled or dropped
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;
}

/// Live channel subscription
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a listener task driven by `cancel`
    pub fn new(channel: impl Into<String>, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            cancel,
            task: Some(task),
        }
    }

    /// Channel name
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether delivery is still running
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Stop delivery and wait for the listener task to exit
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(channel = %self.channel, error = %e, "listener task panicked");
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
