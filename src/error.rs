//! Error types for the two-tier cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache subsystem
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Construction
    // =========================================================================
    /// Configuration error (raised before any instance is usable)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A region cache was requested with different key/value types
    #[error("Cache '{cache}' in region '{region}' was created with different key/value types")]
    RegionTypeMismatch { region: String, cache: String },

    // =========================================================================
    // Data path
    // =========================================================================
    /// Value or key could not be encoded/decoded
    #[error("Codec {operation} failed: {reason}")]
    Codec {
        operation: &'static str,
        reason: String,
    },

    /// Networked store unreachable or a command failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalidation bus publish/subscribe/decode failure
    #[error("Invalidation error: {0}")]
    Invalidation(String),

    // =========================================================================
    // Process plumbing
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Codec failure while encoding
    pub fn encode(reason: impl std::fmt::Display) -> Self {
        Error::Codec {
            operation: "encode",
            reason: reason.to_string(),
        }
    }

    /// Codec failure while decoding
    pub fn decode(reason: impl std::fmt::Display) -> Self {
        Error::Codec {
            operation: "decode",
            reason: reason.to_string(),
        }
    }

    /// Whether the error came from the networked store
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::StoreUnavailable(format!("connection pool: {}", e))
    }
}
