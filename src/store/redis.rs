//! Redis networked store.
//!
//! Commands run on pooled connections (`deadpool-redis`). Each subscription
//! owns a dedicated pub/sub connection, because pooled connections cannot
//! enter SUBSCRIBE mode, and reconnects with exponential backoff when the
//! connection drops. Messages published while a listener is reconnecting are
//! lost; invalidation is best-effort and L2 TTLs bound the staleness.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Pool, Runtime};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{MessageHandler, NetworkedStore, Subscription};
use crate::error::{Error, Result};

/// Keys deleted per DEL during pattern deletion
const DELETE_BATCH: usize = 500;

/// Initial reconnect delay for pub/sub listeners
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delay ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis connection URL (e.g. "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Pool wait/create/recycle timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout_ms: 5000,
        }
    }
}

/// Redis-backed [`NetworkedStore`]
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    url: String,
}

impl RedisStore {
    /// Build a pool and verify the server answers
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = config.pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        }

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("invalid Redis configuration: {}", e)))?;

        let store = Self {
            pool,
            url: config.url.clone(),
        };
        store.ping().await?;
        info!(url = %config.url, "connected to Redis");
        Ok(store)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl NetworkedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let data: Option<Vec<u8>> = conn.get(key).await?;
        Ok(data.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value.as_ref()).await?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.connection().await?;
        conn.pset_ex::<_, _, ()>(key, value.as_ref(), millis).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.connection().await?;

        // SCAN instead of KEYS so large keyspaces do not block the server
        let keys: Vec<String> = {
            let iter = conn.scan_match::<_, String>(pattern).await?;
            iter.collect().await
        };

        let mut removed = 0u64;
        for batch in keys.chunks(DELETE_BATCH) {
            let count: i64 = conn.del(batch).await?;
            removed += count.max(0) as u64;
        }

        debug!(pattern = %pattern, removed, "deleted keys by pattern");
        Ok(removed)
    }

    async fn publish(&self, channel: &str, message: Bytes) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.publish::<_, _, ()>(channel, message.as_ref()).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<Subscription> {
        let client = redis::Client::open(self.url.as_str())?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let name = channel.to_string();

        let task = tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                let outcome = tokio::select! {
                    _ = token.cancelled() => break,
                    outcome = listen(&client, &name, &handler) => outcome,
                };

                match outcome {
                    Ok(()) => backoff = INITIAL_BACKOFF,
                    Err(e) => {
                        error!(
                            channel = %name,
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "pub/sub listener error, reconnecting"
                        );
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
            debug!(channel = %name, "subscription closed");
        });

        Ok(Subscription::new(channel, cancel, task))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Run one pub/sub session until the connection closes or fails
async fn listen(client: &redis::Client, channel: &str, handler: &MessageHandler) -> Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(channel = %channel, "subscribed to channel");

    let mut stream = pubsub.on_message();
    while let Some(message) = stream.next().await {
        match message.get_payload::<Vec<u8>>() {
            Ok(payload) => handler(Bytes::from(payload)),
            Err(e) => debug!(channel = %channel, error = %e, "unreadable pub/sub payload"),
        }
    }

    Err(Error::StoreUnavailable(format!(
        "pub/sub connection for '{}' closed",
        channel
    )))
}
