//! Value types returned by store primitives

use serde::{Deserialize, Serialize};

/// A sorted-set member together with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

/// A member atomically removed from a task index by a due pull
#[derive(Debug, Clone, PartialEq)]
pub struct DueMember {
    pub member: String,
    pub score: f64,
    /// Raw metadata that was stored alongside the member, if any
    pub metadata: Option<String>,
}

/// Diagnostic snapshot of a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key: String,
    pub exists: bool,
    /// Store type name (`string`, `hash`, `zset`, `none`)
    pub key_type: String,
    /// Seconds until expiry; `None` when the key is missing or never expires
    pub ttl_seconds: Option<i64>,
    /// Approximate footprint in bytes, when the backend can report it
    pub memory_bytes: Option<u64>,
}
