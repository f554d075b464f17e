//! # Store Client
//!
//! Thin asynchronous wrapper over the key-value store. Uses enum dispatch over
//! the configured provider and bounds every round trip with the configured
//! operation timeout. A timeout or backend failure surfaces as
//! [`StoreError::StoreUnavailable`]; nothing is retried here.
//!
//! Higher layers (cache manager, task manager) only ever talk to
//! [`StoreClient`], never to a provider directly.

pub mod providers;
pub mod traits;
pub mod types;

pub use providers::redis::redact_url;
pub use providers::{MemoryStoreService, RedisStoreService};
pub use traits::StoreService;
pub use types::{DueMember, KeyInfo, ScoredMember};

use crate::config::{StoreBackendKind, StoreConfig};
use crate::error::{StoreError, StoreResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Store backend, dispatched by match
#[derive(Debug, Clone)]
enum StoreBackend {
    /// Redis provider (boxed to reduce enum size)
    Redis(Box<RedisStoreService>),

    /// In-process provider
    Memory(MemoryStoreService),
}

macro_rules! dispatch {
    ($backend:expr, $svc:ident => $call:expr) => {
        match $backend {
            StoreBackend::Redis($svc) => $call,
            StoreBackend::Memory($svc) => $call,
        }
    };
}

/// Shared handle to the store; cheap to clone
#[derive(Debug, Clone)]
pub struct StoreClient {
    backend: Arc<StoreBackend>,
    operation_timeout: Duration,
}

impl StoreClient {
    /// Connect the backend named by the configuration
    ///
    /// Unlike a best-effort cache, the store holds the task queues, so a
    /// failed Redis connection is returned to the caller rather than
    /// silently replaced.
    pub async fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let backend = match config.backend {
            StoreBackendKind::Redis => {
                let service = RedisStoreService::from_config(config).await?;
                info!(
                    backend = "redis",
                    url = %redact_url(&config.url),
                    "Store client initialized"
                );
                StoreBackend::Redis(Box::new(service))
            }
            StoreBackendKind::Memory => {
                info!(backend = "memory", "Store client initialized");
                StoreBackend::Memory(MemoryStoreService::new())
            }
        };

        Ok(Self {
            backend: Arc::new(backend),
            operation_timeout: config.operation_timeout(),
        })
    }

    /// Client over a fresh in-process store with the default operation timeout
    pub fn in_memory() -> Self {
        Self::with_memory_store(MemoryStoreService::new())
    }

    /// Client over an existing in-process store
    pub fn with_memory_store(store: MemoryStoreService) -> Self {
        Self {
            backend: Arc::new(StoreBackend::Memory(store)),
            operation_timeout: StoreConfig::default().operation_timeout(),
        }
    }

    /// Same backend with a different per-operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn provider_name(&self) -> &'static str {
        dispatch!(self.backend.as_ref(), s => s.provider_name())
    }

    /// The in-process store, when that is the active backend
    pub fn memory_store(&self) -> Option<&MemoryStoreService> {
        match self.backend.as_ref() {
            StoreBackend::Memory(store) => Some(store),
            StoreBackend::Redis(_) => None,
        }
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(operation, key, error = %err, "Store operation failed");
                Err(err)
            }
            Err(_) => {
                let timeout_ms = self.operation_timeout.as_millis() as u64;
                warn!(operation, key, timeout_ms, "Store operation timed out");
                Err(StoreError::unavailable(
                    operation,
                    format!("timed out after {timeout_ms}ms"),
                ))
            }
        }
    }

    pub async fn hset(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.timed("HSET", key, async {
            dispatch!(self.backend.as_ref(), s => s.hset(key, field, value, ttl).await)
        })
        .await
    }

    pub async fn hset_many(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
        replace: bool,
    ) -> StoreResult<()> {
        self.timed("HSET", key, async {
            dispatch!(self.backend.as_ref(), s => s.hset_many(key, fields, ttl, replace).await)
        })
        .await
    }

    pub async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.timed("HGET", key, async {
            dispatch!(self.backend.as_ref(), s => s.hget(key, field).await)
        })
        .await
    }

    pub async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.timed("HGETALL", key, async {
            dispatch!(self.backend.as_ref(), s => s.hgetall(key).await)
        })
        .await
    }

    pub async fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.timed("HMGET", key, async {
            dispatch!(self.backend.as_ref(), s => s.hmget(key, fields).await)
        })
        .await
    }

    pub async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.timed("HDEL", key, async {
            dispatch!(self.backend.as_ref(), s => s.hdel(key, field).await)
        })
        .await
    }

    pub async fn hincrby(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> StoreResult<i64> {
        self.timed("HINCRBY", key, async {
            dispatch!(self.backend.as_ref(), s => s.hincrby(key, field, delta, ttl).await)
        })
        .await
    }

    pub async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.timed("HEXISTS", key, async {
            dispatch!(self.backend.as_ref(), s => s.hexists(key, field).await)
        })
        .await
    }

    pub async fn hlen(&self, key: &str) -> StoreResult<u64> {
        self.timed("HLEN", key, async {
            dispatch!(self.backend.as_ref(), s => s.hlen(key).await)
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.timed("SET", key, async {
            dispatch!(self.backend.as_ref(), s => s.set(key, value, ttl).await)
        })
        .await
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.timed("GET", key, async {
            dispatch!(self.backend.as_ref(), s => s.get(key).await)
        })
        .await
    }

    pub async fn del(&self, key: &str) -> StoreResult<bool> {
        self.timed("DEL", key, async {
            dispatch!(self.backend.as_ref(), s => s.del(key).await)
        })
        .await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.timed("EXISTS", key, async {
            dispatch!(self.backend.as_ref(), s => s.exists(key).await)
        })
        .await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.timed("EXPIRE", key, async {
            dispatch!(self.backend.as_ref(), s => s.expire(key, ttl).await)
        })
        .await
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.timed("TTL", key, async {
            dispatch!(self.backend.as_ref(), s => s.ttl(key).await)
        })
        .await
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.timed("ZADD", key, async {
            dispatch!(self.backend.as_ref(), s => s.zadd(key, member, score).await)
        })
        .await
    }

    pub async fn zadd_existing(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.timed("ZADD", key, async {
            dispatch!(self.backend.as_ref(), s => s.zadd_existing(key, member, score).await)
        })
        .await
    }

    pub async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.timed("ZSCORE", key, async {
            dispatch!(self.backend.as_ref(), s => s.zscore(key, member).await)
        })
        .await
    }

    pub async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.timed("ZRANGEBYSCORE", key, async {
            dispatch!(self.backend.as_ref(), s => s.zrange_by_score(key, min, max, limit).await)
        })
        .await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.timed("ZREM", key, async {
            dispatch!(self.backend.as_ref(), s => s.zrem(key, member).await)
        })
        .await
    }

    pub async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.timed("ZCARD", key, async {
            dispatch!(self.backend.as_ref(), s => s.zcard(key).await)
        })
        .await
    }

    pub async fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        self.timed("ZCOUNT", key, async {
            dispatch!(self.backend.as_ref(), s => s.zcount(key, min, max).await)
        })
        .await
    }

    pub async fn schedule(
        &self,
        index_key: &str,
        metadata_key: &str,
        member: &str,
        score: f64,
        metadata: Option<&str>,
    ) -> StoreResult<()> {
        self.timed("SCHEDULE", index_key, async {
            dispatch!(
                self.backend.as_ref(),
                s => s.schedule(index_key, metadata_key, member, score, metadata).await
            )
        })
        .await
    }

    pub async fn unschedule(
        &self,
        index_key: &str,
        metadata_key: &str,
        member: &str,
    ) -> StoreResult<bool> {
        self.timed("UNSCHEDULE", index_key, async {
            dispatch!(
                self.backend.as_ref(),
                s => s.unschedule(index_key, metadata_key, member).await
            )
        })
        .await
    }

    pub async fn pull_due(
        &self,
        index_key: &str,
        metadata_key: &str,
        max_score: f64,
        limit: Option<usize>,
    ) -> StoreResult<Vec<DueMember>> {
        self.timed("PULL_DUE", index_key, async {
            dispatch!(
                self.backend.as_ref(),
                s => s.pull_due(index_key, metadata_key, max_score, limit).await
            )
        })
        .await
    }

    /// Type, TTL and size of one key, for operators
    pub async fn inspect_key(&self, key: &str) -> StoreResult<KeyInfo> {
        let key_type = self
            .timed("TYPE", key, async {
                dispatch!(self.backend.as_ref(), s => s.key_type(key).await)
            })
            .await?;

        if key_type == "none" {
            return Ok(KeyInfo {
                key: key.to_string(),
                exists: false,
                key_type,
                ttl_seconds: None,
                memory_bytes: None,
            });
        }

        let ttl = self.ttl(key).await?;
        let memory_bytes = self
            .timed("MEMORY USAGE", key, async {
                dispatch!(self.backend.as_ref(), s => s.memory_usage(key).await)
            })
            .await?;

        Ok(KeyInfo {
            key: key.to_string(),
            exists: true,
            key_type,
            ttl_seconds: (ttl >= 0).then_some(ttl),
            memory_bytes,
        })
    }

    /// Ping the backend; a failure or timeout reports unhealthy instead of erroring
    pub async fn health_check(&self) -> bool {
        let result = self
            .timed("PING", "", async {
                dispatch!(self.backend.as_ref(), s => s.health_check().await)
            })
            .await;
        match result {
            Ok(healthy) => healthy,
            Err(err) => {
                debug!(error = %err, "Store health check failed");
                false
            }
        }
    }
}
