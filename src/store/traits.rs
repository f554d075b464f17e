//! Store service trait definition

use super::types::{DueMember, ScoredMember};
use crate::error::StoreResult;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Primitive operations the cache layer consumes from a key-value store
///
/// Implemented by concrete providers (Redis, in-memory). Every method is one
/// logical round trip; multi-step methods (`hset`, `schedule`, `pull_due`)
/// are atomic on the server side. Implementations translate their native
/// errors into [`crate::error::StoreError`].
pub trait StoreService: Send + Sync {
    /// HSET one field and refresh the key's TTL in the same transaction
    fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Write many fields at once; with `replace` the previous record is dropped first
    fn hset_many(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        replace: bool,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Whole record; an absent key yields an empty map
    fn hgetall(&self, key: &str)
        -> impl Future<Output = StoreResult<HashMap<String, String>>> + Send;

    fn hmget(
        &self,
        key: &str,
        fields: &[String],
    ) -> impl Future<Output = StoreResult<Vec<Option<String>>>> + Send;

    /// Returns whether the field existed
    fn hdel(&self, key: &str, field: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// HINCRBY and refresh the key's TTL; returns the new value
    fn hincrby(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> impl Future<Output = StoreResult<i64>> + Send;

    fn hexists(&self, key: &str, field: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    fn hlen(&self, key: &str) -> impl Future<Output = StoreResult<u64>> + Send;

    /// SET with optional expiry
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Returns whether the key existed
    fn del(&self, key: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Returns whether a TTL was applied (false when the key is missing)
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = StoreResult<bool>> + Send;

    /// TTL in seconds with store semantics: -2 missing, -1 no expiry
    fn ttl(&self, key: &str) -> impl Future<Output = StoreResult<i64>> + Send;

    /// Insert or reschedule a member
    fn zadd(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Update the score of a member only if it is already present; returns
    /// whether it was present
    fn zadd_existing(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn zscore(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = StoreResult<Option<f64>>> + Send;

    /// Members with `min <= score <= max`, ascending by score then member
    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> impl Future<Output = StoreResult<Vec<ScoredMember>>> + Send;

    fn zrem(&self, key: &str, member: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    fn zcard(&self, key: &str) -> impl Future<Output = StoreResult<u64>> + Send;

    fn zcount(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Atomically ZADD a member and set or clear its metadata field
    fn schedule(
        &self,
        index_key: &str,
        metadata_key: &str,
        member: &str,
        score: f64,
        metadata: Option<&str>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Atomically ZREM a member and drop its metadata
    fn unschedule(
        &self,
        index_key: &str,
        metadata_key: &str,
        member: &str,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Atomically read and remove every member with score <= `max_score`
    ///
    /// Results are ascending by score. Two concurrent callers never receive
    /// the same member.
    fn pull_due(
        &self,
        index_key: &str,
        metadata_key: &str,
        max_score: f64,
        limit: Option<usize>,
    ) -> impl Future<Output = StoreResult<Vec<DueMember>>> + Send;

    /// Store type name of the key (`none` when missing)
    fn key_type(&self, key: &str) -> impl Future<Output = StoreResult<String>> + Send;

    /// Approximate memory footprint in bytes, if the backend reports it
    fn memory_usage(&self, key: &str) -> impl Future<Output = StoreResult<Option<u64>>> + Send;

    /// Check if the store is reachable
    fn health_check(&self) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Get the name of the store provider
    fn provider_name(&self) -> &'static str;
}
