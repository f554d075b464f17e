//! # Game Cache Facade
//!
//! [`GameCache`] is the single construction point for the store connection
//! and the registry of domain managers. Gameplay code holds one `GameCache`
//! (it is cheap to clone) and asks it for managers by name or by type.
//!
//! ```rust,no_run
//! use chrono::{Duration, Utc};
//! use game_state_cache::config::ConfigManager;
//! use game_state_cache::GameCache;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let cache = GameCache::connect(config.config()).await?;
//!
//! let buildings = cache.building()?;
//! buildings
//!     .enqueue_upgrade(42, 7, Utc::now() + Duration::minutes(5))
//!     .await?;
//! let done = buildings.get_completed_upgrades(42, Utc::now()).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::GameCacheConfig;
use crate::domains::{
    BuffManager, BuildingManager, DomainContext, DomainManager, ItemManager, MissionManager,
    ResearchManager, ResourceManager, UnitManager,
};
use crate::error::{StoreError, StoreResult};
use crate::keys::DomainKind;
use crate::registry::ManagerRegistry;
use crate::store::{KeyInfo, ScoredMember, StoreClient};
use crate::tasks::{QueueStatus, TaskEntry};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of [`GameCache::pull_all_completed`]
#[derive(Debug, Default)]
pub struct PulledTasks {
    /// Removed entries per domain; every one of them is owned by the caller
    pub completed: BTreeMap<DomainKind, Vec<TaskEntry>>,
    pub failed: BTreeMap<DomainKind, StoreError>,
}

impl PulledTasks {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }
}

/// Entry point to the cache layer
#[derive(Debug, Clone)]
pub struct GameCache {
    store: StoreClient,
    registry: Arc<ManagerRegistry>,
}

impl GameCache {
    /// Connect the configured store and start with an empty registry
    pub async fn connect(config: &GameCacheConfig) -> StoreResult<Self> {
        let store = StoreClient::from_config(&config.store).await?;
        info!(
            provider = store.provider_name(),
            default_ttl_seconds = config.cache.default_ttl_seconds,
            "Game cache ready"
        );
        Ok(Self::new(store, Arc::new(config.clone())))
    }

    pub fn new(store: StoreClient, config: Arc<GameCacheConfig>) -> Self {
        let context = DomainContext::new(store.clone(), config);
        Self {
            store,
            registry: Arc::new(ManagerRegistry::new(context)),
        }
    }

    /// Facade over a fresh in-process store with default settings
    pub fn in_memory() -> Self {
        Self::new(
            StoreClient::in_memory(),
            Arc::new(GameCacheConfig::in_memory()),
        )
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    pub fn registry(&self) -> &ManagerRegistry {
        &self.registry
    }

    /// Manager for a domain name, constructed on first use
    pub fn get_manager(&self, domain: &str) -> StoreResult<Arc<dyn DomainManager>> {
        self.registry.get(domain)
    }

    pub fn building(&self) -> StoreResult<Arc<BuildingManager>> {
        self.registry.get_typed(DomainKind::Building)
    }

    pub fn unit(&self) -> StoreResult<Arc<UnitManager>> {
        self.registry.get_typed(DomainKind::Unit)
    }

    pub fn research(&self) -> StoreResult<Arc<ResearchManager>> {
        self.registry.get_typed(DomainKind::Research)
    }

    pub fn buff(&self) -> StoreResult<Arc<BuffManager>> {
        self.registry.get_typed(DomainKind::Buff)
    }

    pub fn item(&self) -> StoreResult<Arc<ItemManager>> {
        self.registry.get_typed(DomainKind::Item)
    }

    pub fn mission(&self) -> StoreResult<Arc<MissionManager>> {
        self.registry.get_typed(DomainKind::Mission)
    }

    pub fn resource(&self) -> StoreResult<Arc<ResourceManager>> {
        self.registry.get_typed(DomainKind::Resource)
    }

    // Raw store wrappers. Keys are used as given, without namespacing.

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.store.set(key, value, ttl).await
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.store.get(key).await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.store.del(key).await
    }

    pub async fn sorted_add(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.store.zadd(key, member, score).await
    }

    /// Members with `min <= score <= max`, ascending
    pub async fn range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        self.store.zrange_by_score(key, min, max, None).await
    }

    /// Queue counts of `scope` in every domain whose manager exists
    pub async fn queue_status_all(
        &self,
        scope: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<BTreeMap<DomainKind, QueueStatus>> {
        let managers = self.registry.constructed();
        let results = join_all(managers.iter().map(|manager| async move {
            let status = manager.queue_status(scope, now).await?;
            Ok::<_, StoreError>((manager.kind(), status))
        }))
        .await;
        results.into_iter().collect()
    }

    /// Pull due tasks of `scope` from every domain whose manager exists
    ///
    /// Domains with nothing due are left out. A failing domain never discards
    /// what the others already removed from their indices: its error is
    /// reported next to their entries in [`PulledTasks::failed`].
    pub async fn pull_all_completed(&self, scope: &str, now: DateTime<Utc>) -> PulledTasks {
        let managers = self.registry.constructed();
        let results = join_all(managers.iter().map(|manager| async move {
            (manager.kind(), manager.pull_completed(scope, now).await)
        }))
        .await;

        let mut pulled = PulledTasks::default();
        for (kind, result) in results {
            match result {
                Ok(entries) if entries.is_empty() => {}
                Ok(entries) => {
                    pulled.completed.insert(kind, entries);
                }
                Err(e) => {
                    warn!(scope, domain = %kind, error = %e, "Domain pull failed");
                    pulled.failed.insert(kind, e);
                }
            }
        }
        debug!(
            scope,
            domains = pulled.completed.len(),
            failed = pulled.failed.len(),
            "Pulled completed tasks"
        );
        pulled
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }

    pub async fn inspect_key(&self, key: &str) -> StoreResult<KeyInfo> {
        self.store.inspect_key(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_typed_and_named_access_share_instances() {
        let cache = GameCache::in_memory();
        let named = cache.get_manager("building").unwrap();
        let typed = cache.building().unwrap();
        assert_eq!(named.kind(), typed.kind());
        assert_eq!(cache.registry().construction_count(), 1);

        cache.unit().unwrap();
        cache.mission().unwrap();
        assert_eq!(cache.registry().construction_count(), 3);
        assert!(matches!(
            cache.get_manager("castle"),
            Err(StoreError::UnknownDomain(_))
        ));
    }

    #[test]
    fn test_clones_share_registry() {
        let cache = GameCache::in_memory();
        let clone = cache.clone();
        clone.research().unwrap();
        assert!(cache.registry().is_constructed(DomainKind::Research));
    }

    #[tokio::test]
    async fn test_raw_wrappers() {
        let cache = GameCache::in_memory();
        cache.set("session:42", "abc", None).await.unwrap();
        assert_eq!(cache.get("session:42").await.unwrap().as_deref(), Some("abc"));
        assert!(cache.delete("session:42").await.unwrap());
        assert_eq!(cache.get("session:42").await.unwrap(), None);

        cache.sorted_add("ranking", "b", 20.0).await.unwrap();
        cache.sorted_add("ranking", "a", 10.0).await.unwrap();
        cache.sorted_add("ranking", "c", 30.0).await.unwrap();
        let members: Vec<String> = cache
            .range_by_score("ranking", 10.0, 20.0)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.member)
            .collect();
        assert_eq!(members, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_pull_all_completed_spans_constructed_domains() {
        let cache = GameCache::in_memory();
        let due = t0() + chrono::Duration::seconds(10);
        cache
            .building()
            .unwrap()
            .enqueue_upgrade_as_of(42, 7, due, t0())
            .await
            .unwrap();
        cache
            .research()
            .unwrap()
            .enqueue_research_as_of(42, 3, due, t0())
            .await
            .unwrap();
        cache.unit().unwrap();

        let status = cache.queue_status_all("42", due).await.unwrap();
        assert_eq!(status.len(), 3);
        assert_eq!(status[&DomainKind::Building].due, 1);
        assert_eq!(status[&DomainKind::Unit].total, 0);

        let pulled = cache.pull_all_completed("42", due).await;
        assert!(pulled.failed.is_empty());
        assert_eq!(
            pulled.completed.keys().copied().collect::<Vec<_>>(),
            vec![DomainKind::Building, DomainKind::Research]
        );
        assert_eq!(pulled.completed[&DomainKind::Building][0].member, "7");
        assert!(cache.pull_all_completed("42", due).await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_domain_keeps_other_domains_entries() {
        let cache = GameCache::in_memory();
        let buildings = cache.building().unwrap();
        buildings
            .enqueue_upgrade_as_of(42, 7, t0() + chrono::Duration::seconds(10), t0())
            .await
            .unwrap();
        cache.research().unwrap();
        cache.set("research:tasks:42", "not an index", None).await.unwrap();

        let pulled = cache
            .pull_all_completed("42", t0() + chrono::Duration::seconds(11))
            .await;
        assert_eq!(pulled.completed[&DomainKind::Building][0].member, "7");
        assert!(pulled.failed.contains_key(&DomainKind::Research));
        assert!(!pulled.failed.contains_key(&DomainKind::Building));

        assert!(buildings
            .get_completed_upgrades(42, t0() + chrono::Duration::seconds(12))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_health_and_inspect() {
        let cache = GameCache::in_memory();
        assert!(cache.health_check().await);

        cache
            .building()
            .unwrap()
            .cache_building_state(
                42,
                7,
                &crate::domains::BuildingState {
                    building_idx: 7,
                    building_lv: 1,
                    status: 0,
                    start_time: None,
                    end_time: None,
                    last_dt: None,
                },
            )
            .await
            .unwrap();

        let info = cache.inspect_key("building:42").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.key_type, "hash");
        assert_eq!(info.ttl_seconds, Some(3_600));

        let missing = cache.inspect_key("building:43").await.unwrap();
        assert!(!missing.exists);
        assert_eq!(missing.key_type, "none");
    }
}
