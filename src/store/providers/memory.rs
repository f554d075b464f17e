//! In-process store provider
//!
//! Implements the store primitives over a single mutex-guarded keyspace with
//! Redis semantics: lazy expiry, empty hashes and sorted sets disappear,
//! WRONGTYPE on type mismatch, ties ordered by member. Every trait method
//! takes the lock once, so multi-step operations are atomic exactly like
//! their MULTI/EXEC and Lua counterparts.
//!
//! This is the store itself, used for tests and local development. It is not
//! a cache in front of Redis.

use crate::error::{StoreError, StoreResult};
use crate::store::traits::StoreService;
use crate::store::types::{DueMember, ScoredMember};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Hash(HashMap<String, String>),
    Sorted(HashMap<String, f64>),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Text(_) => "string",
            StoredValue::Hash(_) => "hash",
            StoredValue::Sorted(_) => "zset",
        }
    }

    fn approximate_bytes(&self) -> u64 {
        let payload = match self {
            StoredValue::Text(s) => s.len(),
            StoredValue::Hash(map) => map.iter().map(|(k, v)| k.len() + v.len()).sum(),
            StoredValue::Sorted(set) => set.keys().map(|m| m.len() + 8).sum(),
        };
        payload as u64
    }

    fn is_empty(&self) -> bool {
        match self {
            StoredValue::Text(_) => false,
            StoredValue::Hash(map) => map.is_empty(),
            StoredValue::Sorted(set) => set.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Live entry for `key`, dropping it first if it has expired
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash(&mut self, op: &str, key: &str) -> StoreResult<Option<&mut HashMap<String, String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(Some(map)),
            Some(_) => Err(StoreError::unavailable(op, WRONGTYPE)),
        }
    }

    fn hash_or_create(
        &mut self,
        op: &str,
        key: &str,
    ) -> StoreResult<&mut HashMap<String, String>> {
        if self.hash(op, key)?.is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: StoredValue::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry {
                value: StoredValue::Hash(map),
                ..
            }) => Ok(map),
            _ => Err(StoreError::unavailable(op, WRONGTYPE)),
        }
    }

    fn sorted(&mut self, op: &str, key: &str) -> StoreResult<Option<&mut HashMap<String, f64>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Sorted(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(StoreError::unavailable(op, WRONGTYPE)),
        }
    }

    fn sorted_or_create(&mut self, op: &str, key: &str) -> StoreResult<&mut HashMap<String, f64>> {
        if self.sorted(op, key)?.is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: StoredValue::Sorted(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry {
                value: StoredValue::Sorted(set),
                ..
            }) => Ok(set),
            _ => Err(StoreError::unavailable(op, WRONGTYPE)),
        }
    }

    fn set_expiry(&mut self, key: &str, ttl: Option<Duration>) {
        if let (Some(ttl), Some(entry)) = (ttl, self.entries.get_mut(key)) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    /// Drop containers left empty by a removal
    fn prune(&mut self, key: &str) {
        if self
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty())
        {
            self.entries.remove(key);
        }
    }

    fn range_by_score(
        &mut self,
        op: &str,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let mut members: Vec<ScoredMember> = match self.sorted(op, key)? {
            None => return Ok(Vec::new()),
            Some(set) => set
                .iter()
                .filter(|(_, score)| **score >= min && **score <= max)
                .map(|(member, score)| ScoredMember {
                    member: member.clone(),
                    score: *score,
                })
                .collect(),
        };
        members.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.member.cmp(&b.member))
        });
        Ok(members)
    }
}

/// In-process store service
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreService {
    keyspace: Arc<Mutex<Keyspace>>,
}

impl MemoryStoreService {
    /// Create an empty in-process store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let mut keyspace = self.keyspace.lock();
        let now = Instant::now();
        keyspace
            .entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        keyspace.entries.len()
    }

    /// Live keys in lexicographic order
    pub fn keys(&self) -> Vec<String> {
        let mut keyspace = self.keyspace.lock();
        let now = Instant::now();
        keyspace
            .entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        let mut keys: Vec<String> = keyspace.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl StoreService for MemoryStoreService {
    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock();
        keyspace
            .hash_or_create("HSET", key)?
            .insert(field.to_string(), value.to_string());
        keyspace.set_expiry(key, ttl);
        Ok(())
    }

    async fn hset_many(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        replace: bool,
    ) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock();
        if replace {
            keyspace.entries.remove(key);
        }
        if fields.is_empty() {
            return Ok(());
        }
        let map = keyspace.hash_or_create("HSET", key)?;
        for (field, value) in fields {
            map.insert(field.clone(), value.clone());
        }
        keyspace.set_expiry(key, ttl);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace
            .hash("HGET", key)?
            .and_then(|map| map.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace.hash("HGETALL", key)?.cloned().unwrap_or_default())
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        let mut keyspace = self.keyspace.lock();
        let map = keyspace.hash("HMGET", key)?;
        Ok(fields
            .iter()
            .map(|field| map.as_ref().and_then(|m| m.get(field).cloned()))
            .collect())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        let removed = keyspace
            .hash("HDEL", key)?
            .is_some_and(|map| map.remove(field).is_some());
        keyspace.prune(key);
        Ok(removed)
    }

    async fn hincrby(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.lock();
        let map = keyspace.hash_or_create("HINCRBY", key)?;
        let current = match map.get(field) {
            None => 0,
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::unavailable("HINCRBY", "ERR hash value is not an integer")
            })?,
        };
        let value = current.checked_add(delta).ok_or_else(|| {
            StoreError::unavailable("HINCRBY", "ERR increment or decrement would overflow")
        })?;
        map.insert(field.to_string(), value.to_string());
        keyspace.set_expiry(key, ttl);
        Ok(value)
    }

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace
            .hash("HEXISTS", key)?
            .is_some_and(|map| map.contains_key(field)))
    }

    async fn hlen(&self, key: &str) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace.hash("HLEN", key)?.map_or(0, |map| map.len() as u64))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock();
        keyspace.entries.insert(
            key.to_string(),
            Entry {
                value: StoredValue::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.live(key) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Text(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::unavailable("GET", WRONGTYPE)),
        }
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        let existed = keyspace.live(key).is_some();
        keyspace.entries.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace.live(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.live(key) {
            None => Ok(false),
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.lock();
        Ok(match keyspace.live(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock();
        keyspace
            .sorted_or_create("ZADD", key)?
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zadd_existing(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        match keyspace.sorted("ZADD", key)? {
            Some(set) if set.contains_key(member) => {
                set.insert(member.to_string(), score);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace
            .sorted("ZSCORE", key)?
            .and_then(|set| set.get(member).copied()))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        let mut keyspace = self.keyspace.lock();
        let mut members = keyspace.range_by_score("ZRANGEBYSCORE", key, min, max)?;
        if let Some(limit) = limit {
            members.truncate(limit);
        }
        Ok(members)
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        let removed = keyspace
            .sorted("ZREM", key)?
            .is_some_and(|set| set.remove(member).is_some());
        keyspace.prune(key);
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace.sorted("ZCARD", key)?.map_or(0, |set| set.len() as u64))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace.sorted("ZCOUNT", key)?.map_or(0, |set| {
            set.values()
                .filter(|score| **score >= min && **score <= max)
                .count() as u64
        }))
    }

    async fn schedule(
        &self,
        index_key: &str,
        metadata_key: &str,
        member: &str,
        score: f64,
        metadata: Option<&str>,
    ) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock();
        // Type-check both keys before mutating either
        keyspace.sorted("ZADD", index_key)?;
        keyspace.hash("HSET", metadata_key)?;

        keyspace
            .sorted_or_create("ZADD", index_key)?
            .insert(member.to_string(), score);
        match metadata {
            Some(raw) => {
                keyspace
                    .hash_or_create("HSET", metadata_key)?
                    .insert(member.to_string(), raw.to_string());
            }
            None => {
                if let Some(map) = keyspace.hash("HDEL", metadata_key)? {
                    map.remove(member);
                }
                keyspace.prune(metadata_key);
            }
        }
        Ok(())
    }

    async fn unschedule(
        &self,
        index_key: &str,
        metadata_key: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock();
        keyspace.hash("HDEL", metadata_key)?;

        let removed = keyspace
            .sorted("ZREM", index_key)?
            .is_some_and(|set| set.remove(member).is_some());
        if let Some(map) = keyspace.hash("HDEL", metadata_key)? {
            map.remove(member);
        }
        keyspace.prune(index_key);
        keyspace.prune(metadata_key);
        Ok(removed)
    }

    async fn pull_due(
        &self,
        index_key: &str,
        metadata_key: &str,
        max_score: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<DueMember>> {
        let mut keyspace = self.keyspace.lock();
        keyspace.hash("HGET", metadata_key)?;

        let mut due = keyspace.range_by_score("PULL_DUE", index_key, f64::NEG_INFINITY, max_score)?;
        if let Some(limit) = limit {
            due.truncate(limit);
        }
        if due.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(set) = keyspace.sorted("ZREM", index_key)? {
            for entry in &due {
                set.remove(&entry.member);
            }
        }
        let mut pulled = Vec::with_capacity(due.len());
        let mut metadata = keyspace.hash("HDEL", metadata_key)?;
        for entry in due {
            let meta = metadata
                .as_mut()
                .and_then(|map| map.remove(&entry.member));
            pulled.push(DueMember {
                member: entry.member,
                score: entry.score,
                metadata: meta,
            });
        }
        keyspace.prune(index_key);
        keyspace.prune(metadata_key);
        Ok(pulled)
    }

    async fn key_type(&self, key: &str) -> StoreResult<String> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace
            .live(key)
            .map_or("none", |entry| entry.value.type_name())
            .to_string())
    }

    async fn memory_usage(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut keyspace = self.keyspace.lock();
        Ok(keyspace
            .live(key)
            .map(|entry| key.len() as u64 + entry.value.approximate_bytes()))
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_round_trip_and_empty_hash_disappears() {
        let store = MemoryStoreService::new();
        store.hset("h", "a", "1", None).await.unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.key_type("h").await.unwrap(), "hash");

        assert!(store.hdel("h", "a").await.unwrap());
        assert!(!store.exists("h").await.unwrap());
        assert_eq!(store.key_type("h").await.unwrap(), "none");
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStoreService::new();
        store.set("k", "v", None).await.unwrap();
        let err = store.hget("k", "f").await.unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
    }

    #[tokio::test]
    async fn test_expired_keys_are_invisible() {
        let store = MemoryStoreService::new();
        store
            .hset("h", "a", "1", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.exists("h").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.exists("h").await.unwrap());
        assert_eq!(store.ttl("h").await.unwrap(), -2);
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_ttl_semantics() {
        let store = MemoryStoreService::new();
        store.set("plain", "v", None).await.unwrap();
        assert_eq!(store.ttl("plain").await.unwrap(), -1);
        assert!(store.expire("plain", Duration::from_secs(30)).await.unwrap());
        assert_eq!(store.ttl("plain").await.unwrap(), 30);
        assert!(!store.expire("missing", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_hincrby_rejects_non_integer() {
        let store = MemoryStoreService::new();
        store.hset("h", "f", "\"text\"", None).await.unwrap();
        assert!(store.hincrby("h", "f", 1, None).await.is_err());
        assert_eq!(store.hincrby("h", "n", -5, None).await.unwrap(), -5);
    }

    #[tokio::test]
    async fn test_zrange_orders_ties_by_member() {
        let store = MemoryStoreService::new();
        store.zadd("z", "b", 1.0).await.unwrap();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "c", 0.5).await.unwrap();

        let members: Vec<String> = store
            .zrange_by_score("z", f64::NEG_INFINITY, f64::INFINITY, None)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.member)
            .collect();
        assert_eq!(members, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_pull_due_takes_metadata_with_it() {
        let store = MemoryStoreService::new();
        store
            .schedule("idx", "idx:meta", "m1", 10.0, Some("{\"n\":1}"))
            .await
            .unwrap();
        store.schedule("idx", "idx:meta", "m2", 20.0, None).await.unwrap();

        let pulled = store.pull_due("idx", "idx:meta", 15.0, None).await.unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].member, "m1");
        assert_eq!(pulled[0].metadata.as_deref(), Some("{\"n\":1}"));
        assert!(!store.exists("idx:meta").await.unwrap());
        assert_eq!(store.zcard("idx").await.unwrap(), 1);
    }
}
