//! # Cache Layer Configuration
//!
//! Store connection, task queue ordering, and per-domain expiry policy.
//! Nothing here is a hidden default: the tie-break rule and each domain's TTL
//! are named settings, and `config/game_cache.toml` in this repository spells
//! out every value.
//!
//! ```toml
//! [store]
//! backend = "redis"
//! url = "redis://localhost:6379"
//! connection_timeout_ms = 2000
//! operation_timeout_ms = 500
//!
//! [cache]
//! default_ttl_seconds = 3600
//!
//! [tasks]
//! tie_break = "member_ascending"
//! max_batch = 500
//!
//! [domains.resource]
//! ttl_seconds = 604800
//! ```

pub mod error;
pub mod loader;

use crate::cache::TtlPolicy;
use crate::keys::DomainKind;
use crate::tasks::TieBreak;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

const MAX_TIMEOUT_MS: u64 = 60_000;

/// Root configuration for the cache layer
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GameCacheConfig {
    /// Store connection settings
    pub store: StoreConfig,

    /// Defaults shared by every domain's cache records
    pub cache: CachePolicyConfig,

    /// Ordering and batching of due-task extraction
    pub tasks: TaskQueueConfig,

    /// Per-domain overrides keyed by domain name (`building`, `unit`, ...)
    pub domains: HashMap<String, DomainPolicyConfig>,
}

/// Which store backend the client connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// Redis or any protocol-compatible server
    Redis,
    /// In-process store for tests and local development
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub url: String,
    /// Bound on establishing the initial connection
    pub connection_timeout_ms: u64,
    /// Bound on every individual round trip
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Redis,
            url: "redis://localhost:6379".to_string(),
            connection_timeout_ms: 2_000,
            operation_timeout_ms: 500,
        }
    }
}

impl StoreConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CachePolicyConfig {
    /// TTL applied to records of domains without an override; 0 disables expiry
    pub default_ttl_seconds: u64,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3_600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Order among entries sharing one due timestamp
    pub tie_break: TieBreak,
    /// Upper bound on entries removed by a single pull; unbounded when absent
    pub max_batch: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DomainPolicyConfig {
    /// Record TTL for this domain; 0 disables expiry
    pub ttl_seconds: Option<u64>,
}

impl GameCacheConfig {
    /// Configuration backed by the in-process store
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig {
                backend: StoreBackendKind::Memory,
                ..StoreConfig::default()
            },
            ..Self::default()
        }
    }

    /// Effective record TTL policy for a domain
    pub fn ttl_for(&self, kind: DomainKind) -> TtlPolicy {
        let seconds = self
            .domains
            .get(kind.as_str())
            .and_then(|policy| policy.ttl_seconds)
            .unwrap_or(self.cache.default_ttl_seconds);
        TtlPolicy::from_seconds(seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.store.backend == StoreBackendKind::Redis && self.store.url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "url",
                "[store] with backend = \"redis\"",
            ));
        }

        for (field, value) in [
            ("store.connection_timeout_ms", self.store.connection_timeout_ms),
            ("store.operation_timeout_ms", self.store.operation_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    format!("must be between 1 and {MAX_TIMEOUT_MS} milliseconds"),
                ));
            }
        }

        if self.tasks.max_batch == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "tasks.max_batch",
                0,
                "must be greater than 0 when set",
            ));
        }

        for name in self.domains.keys() {
            if name.parse::<DomainKind>().is_err() {
                return Err(ConfigurationError::invalid_value(
                    "domains",
                    name,
                    "not a known domain",
                ));
            }
        }

        Ok(())
    }
}
