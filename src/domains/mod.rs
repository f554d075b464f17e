//! # Domain Managers
//!
//! One manager per gameplay domain. Each composes a [`CacheManager`] and a
//! [`TaskManager`] scoped to its own namespace, validates inputs, and shapes
//! raw entries into domain types. No manager touches another domain's keys.
//!
//! Managers are stateless apart from their store handle and settings, so a
//! single instance per domain is shared by every request (see
//! [`crate::registry::ManagerRegistry`]).

pub mod buff;
pub mod building;
pub mod item;
pub mod mission;
pub mod research;
pub mod resource;
pub mod unit;

pub use buff::{ActiveBuff, BuffManager, ExpiredBuff};
pub use building::{BuildingManager, BuildingState};
pub use item::ItemManager;
pub use mission::{ClaimOutcome, MissionManager, MissionProgress};
pub use research::{ResearchManager, ResearchState};
pub use resource::ResourceManager;
pub use unit::{CompletedTraining, UnitManager, UnitStock};

use crate::cache::CacheManager;
use crate::config::GameCacheConfig;
use crate::error::{StoreError, StoreResult};
use crate::keys::DomainKind;
use crate::store::StoreClient;
use crate::tasks::{QueueStatus, TaskEntry, TaskManager, TaskSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Common surface of every domain manager
#[async_trait]
pub trait DomainManager: Send + Sync + Debug {
    fn kind(&self) -> DomainKind;

    fn cache(&self) -> &CacheManager;

    fn tasks(&self) -> &TaskManager;

    /// Remove and return every task of `scope` due at `now`
    async fn pull_completed(&self, scope: &str, now: DateTime<Utc>) -> StoreResult<Vec<TaskEntry>> {
        self.tasks().pull_due(scope, now).await
    }

    async fn queue_status(&self, scope: &str, now: DateTime<Utc>) -> StoreResult<QueueStatus> {
        self.tasks().queue_status(scope, now).await
    }

    /// Drop every cached value of `scope` in this domain; queued tasks stay
    async fn evict(&self, scope: &str) -> StoreResult<bool> {
        self.cache().delete_record(scope).await
    }

    /// Upcast for typed access through the registry
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Everything a manager needs at construction
#[derive(Debug, Clone)]
pub struct DomainContext {
    pub store: StoreClient,
    pub config: Arc<GameCacheConfig>,
}

impl DomainContext {
    pub fn new(store: StoreClient, config: Arc<GameCacheConfig>) -> Self {
        Self { store, config }
    }

    /// Fresh in-process store with default settings
    pub fn in_memory() -> Self {
        Self::new(
            StoreClient::in_memory(),
            Arc::new(GameCacheConfig::in_memory()),
        )
    }

    /// Cache manager for `kind` with that domain's configured TTL
    pub fn cache_for(&self, kind: DomainKind) -> CacheManager {
        CacheManager::new(
            self.store.clone(),
            kind.namespace(),
            self.config.ttl_for(kind),
        )
    }

    pub fn tasks_for(&self, kind: DomainKind) -> TaskManager {
        TaskManager::new(
            self.store.clone(),
            kind.namespace(),
            TaskSettings::from(&self.config.tasks),
        )
    }
}

/// Construct the manager for `kind`
pub fn build_manager(kind: DomainKind, context: &DomainContext) -> Arc<dyn DomainManager> {
    match kind {
        DomainKind::Building => Arc::new(BuildingManager::new(context)),
        DomainKind::Unit => Arc::new(UnitManager::new(context)),
        DomainKind::Research => Arc::new(ResearchManager::new(context)),
        DomainKind::Buff => Arc::new(BuffManager::new(context)),
        DomainKind::Item => Arc::new(ItemManager::new(context)),
        DomainKind::Mission => Arc::new(MissionManager::new(context)),
        DomainKind::Resource => Arc::new(ResourceManager::new(context)),
    }
}

/// Reject due times that are not strictly after `now`
pub(crate) fn require_future(
    kind: DomainKind,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    if due_at <= now {
        return Err(StoreError::invalid_schedule(
            kind.as_str(),
            format!("completion time {due_at} is not after {now}"),
        ));
    }
    Ok(())
}

pub(crate) fn require_positive(kind: DomainKind, what: &str, value: u64) -> StoreResult<()> {
    if value == 0 {
        return Err(StoreError::invalid_schedule(
            kind.as_str(),
            format!("{what} must be greater than 0"),
        ));
    }
    Ok(())
}

/// Index scope shared by every user assigned to `shard`: `shard-{shard}`
///
/// Background workers poll a shard index without knowing which users have
/// pending work. The prefix keeps shard scopes apart from numeric user scopes.
pub fn shard_scope(shard: u32) -> String {
    format!("shard-{shard}")
}

/// Member of a shard index: `{user_id}:{task}`
pub(crate) fn shard_member(user_id: u64, task: &str) -> String {
    format!("{user_id}:{task}")
}

/// Split a shard member into the owning user and the domain's own member
pub(crate) fn split_shard_member<'a>(key: &str, member: &'a str) -> StoreResult<(u64, &'a str)> {
    let (user, task) = member
        .split_once(':')
        .ok_or_else(|| StoreError::corrupt(key, Some(member), "expected user_id:task"))?;
    Ok((parse_id(key, user)?, task))
}

/// Parse a numeric field name or task member stored under `key`
pub(crate) fn parse_id(key: &str, raw: &str) -> StoreResult<u64> {
    raw.parse::<u64>()
        .map_err(|_| StoreError::corrupt(key, Some(raw), "expected a numeric id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_require_future_is_strict() {
        let now = Utc::now();
        assert!(require_future(DomainKind::Building, now + Duration::seconds(1), now).is_ok());
        assert!(matches!(
            require_future(DomainKind::Building, now, now),
            Err(StoreError::InvalidSchedule { .. })
        ));
        assert!(require_future(DomainKind::Unit, now - Duration::seconds(1), now).is_err());
    }

    #[test]
    fn test_shard_members() {
        assert_eq!(shard_scope(3), "shard-3");
        assert_eq!(shard_member(42, "401:2"), "42:401:2");
        assert_eq!(
            split_shard_member("unit:tasks:shard-3", "42:401:2").unwrap(),
            (42, "401:2")
        );
        assert!(matches!(
            split_shard_member("building:tasks:shard-3", "7"),
            Err(StoreError::CorruptCacheEntry { .. })
        ));
        assert!(split_shard_member("building:tasks:shard-3", "x:7").is_err());
    }

    #[test]
    fn test_build_manager_matches_kind() {
        let context = DomainContext::in_memory();
        for kind in DomainKind::ALL {
            let manager = build_manager(kind, &context);
            assert_eq!(manager.kind(), kind);
            assert_eq!(manager.cache().namespace().as_str(), kind.as_str());
            assert_eq!(manager.tasks().namespace().as_str(), kind.as_str());
        }
    }

    #[test]
    fn test_context_applies_domain_ttl() {
        let mut config = GameCacheConfig::in_memory();
        config.domains.insert(
            "mission".to_string(),
            crate::config::DomainPolicyConfig {
                ttl_seconds: Some(0),
            },
        );
        let context = DomainContext::new(StoreClient::in_memory(), Arc::new(config));
        assert_eq!(
            context.cache_for(DomainKind::Mission).ttl_policy(),
            crate::cache::TtlPolicy::Persistent
        );
        assert_eq!(
            context.cache_for(DomainKind::Building).ttl_policy(),
            crate::cache::TtlPolicy::Expire(std::time::Duration::from_secs(3_600))
        );
    }
}
