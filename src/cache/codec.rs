//! Value and Key Codecs
//!
//! Values cross the networked tier as bytes; keys cross the invalidation bus
//! as opaque strings. Both encodings must be faithfully reversible.
//!
//! # Example
//!
//! ```
//! use tiercache::cache::codec::{JsonCodec, Lz4Codec, ValueCodec};
//!
//! let codec = Lz4Codec::new(JsonCodec::<Vec<u32>>::new(), 64);
//! let value: Vec<u32> = (0..1000).collect();
//!
//! let bytes = codec.serialize(&value).unwrap();
//! assert_eq!(codec.deserialize(&bytes).unwrap(), value);
//! ```

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

// =============================================================================
// Codec Traits
// =============================================================================

/// Converts values to and from store payloads
pub trait ValueCodec<V>: Send + Sync {
    /// Encode a value
    fn serialize(&self, value: &V) -> Result<Bytes>;

    /// Decode a payload
    fn deserialize(&self, bytes: &[u8]) -> Result<V>;
}

/// Converts typed keys to and from the opaque strings carried by
/// invalidation messages
pub trait KeyCodec<K>: Send + Sync {
    fn encode(&self, key: &K) -> Result<String>;

    fn decode(&self, encoded: &str) -> Result<K>;
}

// =============================================================================
// JSON
// =============================================================================

/// JSON value codec
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ValueCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &V) -> Result<Bytes> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(Error::encode)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(Error::decode)
    }
}

/// JSON key codec; works for any serde key type
pub struct JsonKeyCodec<K> {
    _marker: PhantomData<fn() -> K>,
}

impl<K> JsonKeyCodec<K> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K> Default for JsonKeyCodec<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyCodec<K> for JsonKeyCodec<K>
where
    K: Serialize + DeserializeOwned,
{
    fn encode(&self, key: &K) -> Result<String> {
        serde_json::to_string(key).map_err(Error::encode)
    }

    fn decode(&self, encoded: &str) -> Result<K> {
        serde_json::from_str(encoded).map_err(Error::decode)
    }
}

/// Identity codec for plain string keys
#[derive(Debug, Clone, Copy, Default)]
pub struct StringKeyCodec;

impl KeyCodec<String> for StringKeyCodec {
    fn encode(&self, key: &String) -> Result<String> {
        Ok(key.clone())
    }

    fn decode(&self, encoded: &str) -> Result<String> {
        Ok(encoded.to_string())
    }
}

// =============================================================================
// LZ4 Compression
// =============================================================================

const FRAME_RAW: u8 = 0;
const FRAME_LZ4: u8 = 1;

/// Wraps a value codec and LZ4-compresses payloads at or above `min_size`.
///
/// Frames carry a one-byte header: `0` raw, `1` LZ4 block with prepended size.
pub struct Lz4Codec<C> {
    inner: C,
    min_size: usize,
    level: i32,
}

impl<C> Lz4Codec<C> {
    /// Create with the default compression level
    pub fn new(inner: C, min_size: usize) -> Self {
        Self::with_level(inner, min_size, 4)
    }

    /// Create with custom compression level
    pub fn with_level(inner: C, min_size: usize, level: i32) -> Self {
        Self {
            inner,
            min_size,
            level,
        }
    }
}

impl<V, C> ValueCodec<V> for Lz4Codec<C>
where
    C: ValueCodec<V>,
{
    fn serialize(&self, value: &V) -> Result<Bytes> {
        let raw = self.inner.serialize(value)?;

        if raw.len() < self.min_size {
            let mut framed = Vec::with_capacity(raw.len() + 1);
            framed.push(FRAME_RAW);
            framed.extend_from_slice(&raw);
            return Ok(Bytes::from(framed));
        }

        let compressed = lz4::block::compress(
            &raw,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::encode(format!("lz4: {}", e)))?;

        let mut framed = Vec::with_capacity(compressed.len() + 1);
        framed.push(FRAME_LZ4);
        framed.extend_from_slice(&compressed);
        Ok(Bytes::from(framed))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<V> {
        match bytes.split_first() {
            Some((&FRAME_RAW, body)) => self.inner.deserialize(body),
            Some((&FRAME_LZ4, body)) => {
                let raw = lz4::block::decompress(body, None)
                    .map_err(|e| Error::decode(format!("lz4: {}", e)))?;
                self.inner.deserialize(&raw)
            }
            Some((other, _)) => Err(Error::decode(format!("unknown frame header {}", other))),
            None => Err(Error::decode("empty payload")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        level: u32,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec::<Profile>::new();
        let profile = Profile {
            name: "steve".into(),
            level: 30,
        };

        let bytes = codec.serialize(&profile).unwrap();
        assert_eq!(codec.deserialize(&bytes).unwrap(), profile);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec::<Profile>::new();
        assert_matches!(
            codec.deserialize(b"not json"),
            Err(Error::Codec {
                operation: "decode",
                ..
            })
        );
    }

    #[test]
    fn test_key_codecs_are_reversible() {
        let json = JsonKeyCodec::<(String, u64)>::new();
        let key = ("world:nether".to_string(), 7u64);
        let encoded = json.encode(&key).unwrap();
        assert_eq!(json.decode(&encoded).unwrap(), key);

        let plain = StringKeyCodec;
        assert_eq!(plain.decode(&plain.encode(&"a:b".to_string()).unwrap()).unwrap(), "a:b");
    }

    #[test]
    fn test_lz4_small_payload_stays_raw() {
        let codec = Lz4Codec::new(JsonCodec::<String>::new(), 1024);
        let bytes = codec.serialize(&"tiny".to_string()).unwrap();

        assert_eq!(bytes[0], FRAME_RAW);
        assert_eq!(codec.deserialize(&bytes).unwrap(), "tiny");
    }

    #[test]
    fn test_lz4_large_payload_compresses() {
        let codec = Lz4Codec::new(JsonCodec::<String>::new(), 64);
        let value = "abc".repeat(1000);
        let bytes = codec.serialize(&value).unwrap();

        assert_eq!(bytes[0], FRAME_LZ4);
        assert!(bytes.len() < value.len());
        assert_eq!(codec.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_lz4_rejects_unknown_frame() {
        let codec = Lz4Codec::new(JsonCodec::<String>::new(), 64);
        assert_matches!(codec.deserialize(&[9, 1, 2]), Err(Error::Codec { .. }));
        assert_matches!(codec.deserialize(&[]), Err(Error::Codec { .. }));
    }
}
