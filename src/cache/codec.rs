//! Encoding of cached values.
//!
//! Values are wrapped in a small envelope carrying a format version and the
//! time they were computed, then serialized to MessagePack.

use crate::error::VidsyncError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Version of the cached value format
const CACHE_VALUE_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    cached_at: DateTime<Utc>,
    data: &'a T,
}

/// Decoded cache entry
#[derive(Deserialize, Debug)]
pub struct Envelope<T> {
    pub version: u32,
    pub cached_at: DateTime<Utc>,
    pub data: T,
}

pub fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, VidsyncError> {
    let envelope = EnvelopeRef {
        version: CACHE_VALUE_VERSION,
        cached_at: Utc::now(),
        data,
    };
    // Named fields keep the payload self-describing across struct changes.
    Ok(rmp_serde::to_vec_named(&envelope)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<Envelope<T>, VidsyncError> {
    let envelope: Envelope<T> = rmp_serde::from_slice(bytes)?;

    if envelope.version != CACHE_VALUE_VERSION {
        return Err(VidsyncError::EncodingFailed(format!(
            "cached value version {} does not match {}",
            envelope.version, CACHE_VALUE_VERSION
        )));
    }

    Ok(envelope)
}
