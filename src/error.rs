//! # Cache Layer Errors
//!
//! Every backend failure is translated into [`StoreError`] at the store client
//! boundary; raw `redis::RedisError` values never reach domain managers or
//! gameplay code. A missing value is not an error: get-style operations return
//! `Ok(None)` for "not found".

use thiserror::Error;

/// Errors produced by the cache and task-queue layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store could not be reached, returned a backend error, or a round
    /// trip exceeded its timeout. Callers usually fall back to the database.
    #[error("Store unavailable during {operation}: {reason}")]
    StoreUnavailable { operation: String, reason: String },

    /// A stored value failed to deserialize
    #[error("Corrupt cache entry at {key}{}: {reason}", field_suffix(.field))]
    CorruptCacheEntry {
        key: String,
        field: Option<String>,
        reason: String,
    },

    /// A domain manager rejected a scheduling request
    #[error("Invalid schedule for {domain}: {reason}")]
    InvalidSchedule { domain: String, reason: String },

    /// A key segment broke the namespacing rules
    #[error("Invalid store key: {reason}")]
    InvalidKey { reason: String },

    /// A quantity change cannot be applied
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// No domain manager is registered under this name
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// A value could not be encoded before writing
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(key: impl Into<String>, field: Option<&str>, reason: impl Into<String>) -> Self {
        Self::CorruptCacheEntry {
            key: key.into(),
            field: field.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn invalid_schedule(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    /// True when the caller should treat the cache as temporarily absent
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// True for failures that callers should handle exactly like a miss:
    /// read from the system of record and overwrite the entry on next write.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CorruptCacheEntry { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" (field {f})"))
        .unwrap_or_default()
}

/// Result type for cache layer operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_entry_display_includes_field() {
        let err = StoreError::corrupt("building:42", Some("7"), "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Corrupt cache entry at building:42 (field 7): expected value at line 1"
        );

        let err = StoreError::corrupt("mission:42:meta", None, "eof");
        assert_eq!(err.to_string(), "Corrupt cache entry at mission:42:meta: eof");
    }

    #[test]
    fn test_classification_helpers() {
        assert!(StoreError::unavailable("HGET", "timed out").is_unavailable());
        assert!(!StoreError::unavailable("HGET", "timed out").is_cache_miss());
        assert!(StoreError::corrupt("k", None, "bad").is_cache_miss());
        assert!(!StoreError::invalid_schedule("building", "past").is_unavailable());
    }
}
