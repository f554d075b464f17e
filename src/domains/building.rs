//! Building state cache and upgrade completion queue
//!
//! Record `building:{user_id}` holds one field per building id. The index
//! `building:tasks:{user_id}` holds building ids scored by upgrade completion.
//! Shard indices `building:tasks:shard-{n}` hold `{user_id}:{building_id}` for
//! workers that poll every user of a shard at once.

use super::{
    parse_id, require_future, require_positive, shard_member, shard_scope, split_shard_member,
    DomainContext, DomainManager,
};
use crate::cache::CacheManager;
use crate::error::StoreResult;
use crate::keys::DomainKind;
use crate::tasks::TaskManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const KIND: DomainKind = DomainKind::Building;

/// Cached view of one building row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingState {
    pub building_idx: u64,
    pub building_lv: u32,
    /// 0 idle, 1 constructing, 2 upgrading
    pub status: u8,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_dt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BuildingManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl BuildingManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    /// Write one building's state without touching the user's other buildings
    pub async fn cache_building_state(
        &self,
        user_id: u64,
        building_id: u64,
        state: &BuildingState,
    ) -> StoreResult<()> {
        self.cache
            .set_field(&user_id.to_string(), &building_id.to_string(), state)
            .await
    }

    pub async fn get_building_state(
        &self,
        user_id: u64,
        building_id: u64,
    ) -> StoreResult<Option<BuildingState>> {
        self.cache
            .get_field(&user_id.to_string(), &building_id.to_string())
            .await
    }

    /// Every cached building of the user keyed by building id
    pub async fn get_all_buildings(
        &self,
        user_id: u64,
    ) -> StoreResult<Option<BTreeMap<u64, BuildingState>>> {
        let scope = user_id.to_string();
        let Some(record) = self.cache.get_record::<BuildingState>(&scope).await? else {
            return Ok(None);
        };
        let key = self.cache.record_key(&scope)?;
        record
            .into_iter()
            .map(|(field, state)| Ok((parse_id(key.as_str(), &field)?, state)))
            .collect::<StoreResult<BTreeMap<_, _>>>()
            .map(Some)
    }

    pub async fn remove_building_state(&self, user_id: u64, building_id: u64) -> StoreResult<bool> {
        self.cache
            .delete_field(&user_id.to_string(), &building_id.to_string())
            .await
    }

    /// Queue an upgrade that completes at `completes_at`
    ///
    /// Fails with `InvalidSchedule` when `completes_at` is not strictly in the
    /// future or `building_id` is 0. Re-enqueueing a building moves its
    /// completion time.
    pub async fn enqueue_upgrade(
        &self,
        user_id: u64,
        building_id: u64,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.enqueue_upgrade_as_of(user_id, building_id, completes_at, Utc::now())
            .await
    }

    /// [`enqueue_upgrade`](Self::enqueue_upgrade) against an explicit clock
    pub async fn enqueue_upgrade_as_of(
        &self,
        user_id: u64,
        building_id: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_positive(KIND, "building id", building_id)?;
        require_future(KIND, completes_at, now)?;
        self.tasks
            .schedule(&user_id.to_string(), &building_id.to_string(), completes_at)
            .await?;
        info!(user_id, building_id, completes_at = %completes_at, "Building upgrade queued");
        Ok(())
    }

    /// Remove and return the ids of buildings whose upgrade is done by `now`
    ///
    /// Ordered by completion time. Safe to call from many workers at once:
    /// every completed upgrade is returned to exactly one caller.
    pub async fn get_completed_upgrades(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<u64>> {
        let scope = user_id.to_string();
        let (index, _) = self.tasks.index_keys(&scope)?;
        let completed = self.tasks.pull_due(&scope, now).await?;

        let mut ids = Vec::with_capacity(completed.len());
        for entry in completed {
            match parse_id(index.as_str(), &entry.member) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(user_id, error = %e, "Dropping unreadable upgrade entry"),
            }
        }
        Ok(ids)
    }

    /// Queue an upgrade on the shard index instead of the user's own
    pub async fn enqueue_upgrade_in_shard(
        &self,
        shard: u32,
        user_id: u64,
        building_id: u64,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.enqueue_upgrade_in_shard_as_of(shard, user_id, building_id, completes_at, Utc::now())
            .await
    }

    pub async fn enqueue_upgrade_in_shard_as_of(
        &self,
        shard: u32,
        user_id: u64,
        building_id: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_positive(KIND, "building id", building_id)?;
        require_future(KIND, completes_at, now)?;
        self.tasks
            .schedule(
                &shard_scope(shard),
                &shard_member(user_id, &building_id.to_string()),
                completes_at,
            )
            .await?;
        info!(shard, user_id, building_id, completes_at = %completes_at, "Building upgrade queued");
        Ok(())
    }

    /// Remove and return `(user_id, building_id)` of every upgrade in the
    /// shard done by `now`, ordered by completion time
    pub async fn get_completed_upgrades_in_shard(
        &self,
        shard: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(u64, u64)>> {
        let scope = shard_scope(shard);
        let (index, _) = self.tasks.index_keys(&scope)?;
        let completed = self.tasks.pull_due(&scope, now).await?;

        let mut upgrades = Vec::with_capacity(completed.len());
        for entry in completed {
            let parsed = split_shard_member(index.as_str(), &entry.member)
                .and_then(|(user_id, id)| Ok((user_id, parse_id(index.as_str(), id)?)));
            match parsed {
                Ok(upgrade) => upgrades.push(upgrade),
                Err(e) => warn!(shard, error = %e, "Dropping unreadable upgrade entry"),
            }
        }
        Ok(upgrades)
    }

    pub async fn cancel_upgrade_in_shard(
        &self,
        shard: u32,
        user_id: u64,
        building_id: u64,
    ) -> StoreResult<bool> {
        self.tasks
            .cancel(
                &shard_scope(shard),
                &shard_member(user_id, &building_id.to_string()),
            )
            .await
    }

    pub async fn cancel_upgrade(&self, user_id: u64, building_id: u64) -> StoreResult<bool> {
        self.tasks
            .cancel(&user_id.to_string(), &building_id.to_string())
            .await
    }

    pub async fn upgrade_eta(
        &self,
        user_id: u64,
        building_id: u64,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.tasks
            .due_at(&user_id.to_string(), &building_id.to_string())
            .await
    }

    /// Finish a queued upgrade immediately; false when none is queued
    pub async fn speed_up_upgrade(
        &self,
        user_id: u64,
        building_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.tasks
            .complete_now(&user_id.to_string(), &building_id.to_string(), now)
            .await
    }
}

#[async_trait]
impl DomainManager for BuildingManager {
    fn kind(&self) -> DomainKind {
        KIND
    }

    fn cache(&self) -> &CacheManager {
        &self.cache
    }

    fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
