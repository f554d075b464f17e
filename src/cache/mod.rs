//! # Field-Level Cache
//!
//! [`CacheManager`] stores one record per scope (usually a user id) as a hash
//! under `{domain}:{scope}`. Every field holds a JSON value and is read and
//! written independently, so concurrent writers touching different fields of
//! the same record never clobber each other.
//!
//! Writes refresh the record's expiry from the manager's [`TtlPolicy`] in the
//! same transaction as the field write.
//!
//! Reads distinguish three outcomes:
//!
//! - `Ok(Some(value))` for a decodable value
//! - `Ok(None)` for a field or record that was never written (or expired)
//! - `Err(StoreError::CorruptCacheEntry)` for a value that fails to decode;
//!   callers treat it like a miss (see [`StoreError::is_cache_miss`])

use crate::error::{StoreError, StoreResult};
use crate::keys::{Namespace, StoreKey};
use crate::store::StoreClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Expiry applied to records on every write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Records never expire
    Persistent,
    /// Records expire this long after their most recent write
    Expire(Duration),
}

impl TtlPolicy {
    /// Zero seconds means no expiry
    pub fn from_seconds(seconds: u64) -> Self {
        if seconds == 0 {
            Self::Persistent
        } else {
            Self::Expire(Duration::from_secs(seconds))
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Persistent => None,
            Self::Expire(ttl) => Some(*ttl),
        }
    }
}

/// Hash-backed cache records for one domain namespace
#[derive(Debug, Clone)]
pub struct CacheManager {
    store: StoreClient,
    namespace: Namespace,
    ttl: TtlPolicy,
}

impl CacheManager {
    pub fn new(store: StoreClient, namespace: Namespace, ttl: TtlPolicy) -> Self {
        Self {
            store,
            namespace,
            ttl,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.ttl
    }

    /// Key of the record for `scope`
    pub fn record_key(&self, scope: &str) -> StoreResult<StoreKey> {
        StoreKey::record(&self.namespace, scope)
    }

    /// Write one field, creating the record if needed
    pub async fn set_field<T>(&self, scope: &str, field: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let key = self.record_key(scope)?;
        let raw = serde_json::to_string(value)?;
        self.store
            .hset(key.as_str(), field, &raw, self.ttl.as_duration())
            .await?;
        debug!(key = %key, field, "Cache field written");
        Ok(())
    }

    /// Write several fields in one transaction, leaving other fields untouched
    pub async fn set_fields<K, V, I>(&self, scope: &str, fields: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let key = self.record_key(scope)?;
        let encoded = encode_fields(fields)?;
        if encoded.is_empty() {
            return Ok(());
        }
        self.store
            .hset_many(key.as_str(), &encoded, self.ttl.as_duration(), false)
            .await?;
        debug!(key = %key, fields = encoded.len(), "Cache fields written");
        Ok(())
    }

    /// Replace the whole record atomically; an empty map removes it
    pub async fn set_record<K, V, I>(&self, scope: &str, fields: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let key = self.record_key(scope)?;
        let encoded = encode_fields(fields)?;
        self.store
            .hset_many(key.as_str(), &encoded, self.ttl.as_duration(), true)
            .await?;
        debug!(key = %key, fields = encoded.len(), "Cache record replaced");
        Ok(())
    }

    /// Read one field
    ///
    /// A stored JSON `null` read as `Option<T>` comes back as `Some(None)`,
    /// which keeps it distinct from a field that was never written.
    pub async fn get_field<T: DeserializeOwned>(
        &self,
        scope: &str,
        field: &str,
    ) -> StoreResult<Option<T>> {
        let key = self.record_key(scope)?;
        match self.store.hget(key.as_str(), field).await? {
            Some(raw) => {
                debug!(key = %key, field, "Cache HIT");
                decode(&key, Some(field), &raw).map(Some)
            }
            None => {
                debug!(key = %key, field, "Cache MISS");
                Ok(None)
            }
        }
    }

    /// Read selected fields in one round trip, in the order requested
    pub async fn get_fields<T: DeserializeOwned>(
        &self,
        scope: &str,
        fields: &[&str],
    ) -> StoreResult<Vec<Option<T>>> {
        let key = self.record_key(scope)?;
        let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let raw = self.store.hmget(key.as_str(), &names).await?;

        names
            .iter()
            .zip(raw)
            .map(|(field, value)| match value {
                Some(raw) => decode(&key, Some(field.as_str()), &raw).map(Some),
                None => Ok(None),
            })
            .collect()
    }

    /// Read the whole record in one round trip; `Ok(None)` when it does not exist
    pub async fn get_record<T: DeserializeOwned>(
        &self,
        scope: &str,
    ) -> StoreResult<Option<HashMap<String, T>>> {
        let key = self.record_key(scope)?;
        let raw = self.store.hgetall(key.as_str()).await?;
        if raw.is_empty() {
            debug!(key = %key, "Cache record MISS");
            return Ok(None);
        }

        let mut record = HashMap::with_capacity(raw.len());
        for (field, value) in raw {
            let decoded = decode(&key, Some(field.as_str()), &value)?;
            record.insert(field, decoded);
        }
        debug!(key = %key, fields = record.len(), "Cache record HIT");
        Ok(Some(record))
    }

    /// Remove one field; returns whether it existed
    pub async fn delete_field(&self, scope: &str, field: &str) -> StoreResult<bool> {
        let key = self.record_key(scope)?;
        self.store.hdel(key.as_str(), field).await
    }

    /// Remove the whole record; returns whether it existed
    pub async fn delete_record(&self, scope: &str) -> StoreResult<bool> {
        let key = self.record_key(scope)?;
        let existed = self.store.del(key.as_str()).await?;
        debug!(key = %key, existed, "Cache record deleted");
        Ok(existed)
    }

    /// Atomically add `delta` to an integer field and return the new value
    ///
    /// A missing field counts as 0. Integer fields written by
    /// [`set_field`](Self::set_field) are valid targets because their JSON
    /// encoding is the bare number.
    pub async fn increment_field(&self, scope: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let key = self.record_key(scope)?;
        self.store
            .hincrby(key.as_str(), field, delta, self.ttl.as_duration())
            .await
    }

    pub async fn field_exists(&self, scope: &str, field: &str) -> StoreResult<bool> {
        let key = self.record_key(scope)?;
        self.store.hexists(key.as_str(), field).await
    }

    /// Number of fields in the record (0 when absent)
    pub async fn record_len(&self, scope: &str) -> StoreResult<u64> {
        let key = self.record_key(scope)?;
        self.store.hlen(key.as_str()).await
    }

    /// Re-apply the expiry policy without writing; false when the record is
    /// absent or the policy is persistent
    pub async fn refresh_ttl(&self, scope: &str) -> StoreResult<bool> {
        let key = self.record_key(scope)?;
        match self.ttl {
            TtlPolicy::Persistent => Ok(false),
            TtlPolicy::Expire(ttl) => self.store.expire(key.as_str(), ttl).await,
        }
    }

    /// Remaining lifetime of the record; `None` when absent or persistent
    pub async fn ttl(&self, scope: &str) -> StoreResult<Option<Duration>> {
        let key = self.record_key(scope)?;
        let seconds = self.store.ttl(key.as_str()).await?;
        Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
    }

    /// Write a scalar value at `{domain}:{scope}:{name}`
    pub async fn set_value<T>(&self, scope: &str, name: &str, value: &T) -> StoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let key = StoreKey::sub(&self.namespace, scope, name)?;
        let raw = serde_json::to_string(value)?;
        self.store
            .set(key.as_str(), &raw, self.ttl.as_duration())
            .await
    }

    pub async fn get_value<T: DeserializeOwned>(
        &self,
        scope: &str,
        name: &str,
    ) -> StoreResult<Option<T>> {
        let key = StoreKey::sub(&self.namespace, scope, name)?;
        match self.store.get(key.as_str()).await? {
            Some(raw) => decode(&key, None, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn delete_value(&self, scope: &str, name: &str) -> StoreResult<bool> {
        let key = StoreKey::sub(&self.namespace, scope, name)?;
        self.store.del(key.as_str()).await
    }
}

fn encode_fields<K, V, I>(fields: I) -> StoreResult<Vec<(String, String)>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Serialize,
{
    fields
        .into_iter()
        .map(|(field, value)| Ok((field.into(), serde_json::to_string(&value)?)))
        .collect()
}

fn decode<T: DeserializeOwned>(key: &StoreKey, field: Option<&str>, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        warn!(
            key = %key,
            field = field.unwrap_or(""),
            error = %e,
            "Cache entry failed to deserialize"
        );
        StoreError::corrupt(key.as_str(), field, e.to_string())
    })
}
