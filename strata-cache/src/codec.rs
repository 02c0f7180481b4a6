//! Encoding bridge between payload types and storage-safe bytes.
//!
//! Payloads are JSON-encoded; persisted records prepend the write timestamp
//! as 8 little-endian bytes of epoch milliseconds:
//!
//! ```text
//! [written_at millis: 8 bytes LE][json payload]
//! ```
//!
//! The record layout is covered by [`strata_core::SCHEMA_VERSION`]; byte
//! tiers clear themselves when the version changes rather than migrating.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use strata_core::{CodecError, RawEntry};

/// Minimum length of a persisted record (the timestamp prefix).
const RECORD_HEADER_LEN: usize = 8;

/// Serializes and deserializes arbitrary payload types.
pub struct EncodingBridge;

impl EncodingBridge {
    /// Encode a payload to storage-safe bytes.
    pub fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            reason: e.to_string(),
        })
    }

    /// Decode a payload from bytes, failing if the stream cannot be
    /// interpreted as `V`.
    pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            type_name: std::any::type_name::<V>(),
            reason: e.to_string(),
        })
    }

    /// Encode a raw entry into the persisted record layout.
    pub fn encode_record(entry: &RawEntry) -> Vec<u8> {
        let timestamp = entry.written_at.timestamp_millis().to_le_bytes();
        let mut bytes = Vec::with_capacity(RECORD_HEADER_LEN + entry.value.len());
        bytes.extend_from_slice(&timestamp);
        bytes.extend_from_slice(&entry.value);
        bytes
    }

    /// Decode a persisted record back into a raw entry.
    ///
    /// Cost is rederived from the payload length.
    pub fn decode_record(bytes: &[u8]) -> Result<RawEntry, CodecError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(CodecError::MalformedRecord {
                reason: format!("record too short: {} bytes", bytes.len()),
            });
        }
        let timestamp_bytes: [u8; 8] =
            bytes[..RECORD_HEADER_LEN]
                .try_into()
                .map_err(|_| CodecError::MalformedRecord {
                    reason: "invalid timestamp prefix".to_string(),
                })?;
        let millis = i64::from_le_bytes(timestamp_bytes);
        let written_at: DateTime<Utc> =
            DateTime::from_timestamp_millis(millis).ok_or_else(|| CodecError::MalformedRecord {
                reason: format!("timestamp out of range: {millis}"),
            })?;
        let payload = bytes[RECORD_HEADER_LEN..].to_vec();
        let cost = payload.len() as u64;
        Ok(RawEntry::with_written_at(payload, written_at, cost))
    }
}
