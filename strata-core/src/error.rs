//! Error types for STRATA cache operations.
//!
//! Propagation policy: codec and tier-I/O failures are tier-local and the
//! orchestrator treats them as misses, so they never surface to callers.
//! Only `Upstream` (a failed fetch operation with no stale fallback) and
//! `TypeMismatch` (a deduplication waiter asking for the wrong result type)
//! reach the public boundary. Errors are `Clone` because a single in-flight
//! failure is delivered to every waiter on a shared future.

use std::sync::Arc;

use thiserror::Error;

/// Payload encoding/decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode payload: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode payload as {type_name}: {reason}")]
    Decode {
        type_name: &'static str,
        reason: String,
    },

    #[error("Malformed cache record: {reason}")]
    MalformedRecord { reason: String },
}

/// Master error type for cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Payload could not be encoded or decoded. Treated as a tier miss.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A deduplication waiter requested a different result type than the
    /// registered in-flight fetch produces. This is a caller-side
    /// programming defect, not a runtime condition to recover from.
    #[error("Type mismatch for key {key}: in-flight fetch produces {registered}, caller requested {requested}")]
    TypeMismatch {
        key: String,
        registered: &'static str,
        requested: &'static str,
    },

    /// A disk or persistent tier failed. The orchestrator degrades by
    /// skipping the tier; this never fails a fetch on its own.
    #[error("Tier I/O error in {tier} tier: {reason}")]
    TierIo {
        tier: &'static str,
        reason: String,
    },

    /// The caller-supplied fetch operation failed.
    #[error("Fetch operation failed: {0}")]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),
}

impl CacheError {
    /// Wrap a caller-side fetch failure.
    pub fn upstream<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream(Arc::new(err))
    }

    /// True for errors the orchestrator swallows at the tier boundary.
    pub fn is_tier_local(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::TierIo { .. })
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("upstream exploded")]
    struct FakeUpstream;

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::Decode {
            type_name: "Vec<Activity>",
            reason: "unexpected EOF".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Vec<Activity>"));
        assert!(msg.contains("unexpected EOF"));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = CacheError::TypeMismatch {
            key: "strava:activities:7".to_string(),
            registered: "Vec<Activity>",
            requested: "String",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("strava:activities:7"));
        assert!(msg.contains("Vec<Activity>"));
        assert!(msg.contains("String"));
    }

    #[test]
    fn test_tier_io_display() {
        let err = CacheError::TierIo {
            tier: "disk",
            reason: "env unavailable".to_string(),
        };
        assert!(format!("{}", err).contains("disk"));
    }

    #[test]
    fn test_upstream_is_cloneable() {
        let err = CacheError::upstream(FakeUpstream);
        let clone = err.clone();
        assert!(format!("{}", clone).contains("upstream exploded"));
    }

    #[test]
    fn test_tier_local_classification() {
        assert!(CacheError::Codec(CodecError::Encode {
            reason: "nan".to_string()
        })
        .is_tier_local());
        assert!(CacheError::TierIo {
            tier: "sqlite",
            reason: "locked".to_string()
        }
        .is_tier_local());
        assert!(!CacheError::upstream(FakeUpstream).is_tier_local());
        assert!(!CacheError::TypeMismatch {
            key: "k".to_string(),
            registered: "A",
            requested: "B",
        }
        .is_tier_local());
    }
}
