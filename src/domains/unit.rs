//! Unit stock cache and training completion queue
//!
//! Training entries use the member `{unit_type}` or `{unit_type}:{slot}` when
//! the player trains in a numbered queue slot; the trained count rides along
//! as task metadata. Shard indices prefix the member with `{user_id}:`.

use super::{
    require_future, require_positive, shard_member, shard_scope, split_shard_member,
    DomainContext, DomainManager,
};
use crate::cache::CacheManager;
use crate::error::{StoreError, StoreResult};
use crate::keys::{DomainKind, StoreKey};
use crate::tasks::{TaskEntry, TaskManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tracing::{info, warn};

const KIND: DomainKind = DomainKind::Unit;

/// Cached counts for one unit type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStock {
    pub unit_idx: u64,
    pub total: i64,
    pub ready: i64,
    pub field: i64,
    pub injured: i64,
    pub wounded: i64,
    pub healing: i64,
    pub death: i64,
    pub training: i64,
    pub upgrading: i64,
}

/// A finished training batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedTraining {
    pub unit_type: u64,
    pub slot: Option<u64>,
    pub unit_count: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TrainingMetadata {
    unit_count: u64,
}

#[derive(Debug, Clone)]
pub struct UnitManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl UnitManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    pub async fn cache_unit(&self, user_id: u64, stock: &UnitStock) -> StoreResult<()> {
        self.cache
            .set_field(&user_id.to_string(), &stock.unit_idx.to_string(), stock)
            .await
    }

    pub async fn get_unit(&self, user_id: u64, unit_idx: u64) -> StoreResult<Option<UnitStock>> {
        self.cache
            .get_field(&user_id.to_string(), &unit_idx.to_string())
            .await
    }

    /// Every cached unit type of the user, ordered by unit id
    pub async fn get_all_units(&self, user_id: u64) -> StoreResult<Option<Vec<UnitStock>>> {
        let record = self
            .cache
            .get_record::<UnitStock>(&user_id.to_string())
            .await?;
        Ok(record.map(|record| {
            let mut units: Vec<UnitStock> = record.into_values().collect();
            units.sort_by_key(|u| u.unit_idx);
            units
        }))
    }

    /// Queue a training batch of `unit_count` units of `unit_type`
    pub async fn enqueue_training(
        &self,
        user_id: u64,
        unit_type: u64,
        slot: Option<u64>,
        unit_count: u64,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.enqueue_training_as_of(
            user_id,
            unit_type,
            slot,
            unit_count,
            completes_at,
            Utc::now(),
        )
        .await
    }

    pub async fn enqueue_training_as_of(
        &self,
        user_id: u64,
        unit_type: u64,
        slot: Option<u64>,
        unit_count: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.queue_training(
            &user_id.to_string(),
            &member(unit_type, slot),
            unit_type,
            unit_count,
            completes_at,
            now,
        )
        .await?;
        info!(user_id, unit_type, ?slot, unit_count, "Unit training queued");
        Ok(())
    }

    /// Queue a training batch on the shard index instead of the user's own
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_training_in_shard_as_of(
        &self,
        shard: u32,
        user_id: u64,
        unit_type: u64,
        slot: Option<u64>,
        unit_count: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.queue_training(
            &shard_scope(shard),
            &shard_member(user_id, &member(unit_type, slot)),
            unit_type,
            unit_count,
            completes_at,
            now,
        )
        .await?;
        info!(shard, user_id, unit_type, ?slot, unit_count, "Unit training queued");
        Ok(())
    }

    async fn queue_training(
        &self,
        scope: &str,
        member: &str,
        unit_type: u64,
        unit_count: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_positive(KIND, "unit type", unit_type)?;
        require_positive(KIND, "unit count", unit_count)?;
        require_future(KIND, completes_at, now)?;
        self.tasks
            .schedule_with_metadata(scope, member, completes_at, &TrainingMetadata { unit_count })
            .await
    }

    /// Remove and return training batches finished by `now`
    pub async fn get_completed_training(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<CompletedTraining>> {
        let scope = user_id.to_string();
        let (index, _) = self.tasks.index_keys(&scope)?;
        let completed = self.tasks.pull_due(&scope, now).await?;
        let mut batches = Vec::with_capacity(completed.len());
        for entry in completed {
            match completed_training(&index, &entry.member, &entry) {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(user_id, error = %e, "Dropping unreadable training entry"),
            }
        }
        Ok(batches)
    }

    /// `(user_id, batch)` of every training batch in the shard finished by `now`
    pub async fn get_completed_training_in_shard(
        &self,
        shard: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(u64, CompletedTraining)>> {
        let scope = shard_scope(shard);
        let (index, _) = self.tasks.index_keys(&scope)?;
        let completed = self.tasks.pull_due(&scope, now).await?;
        let mut batches = Vec::with_capacity(completed.len());
        for entry in completed {
            let parsed = split_shard_member(index.as_str(), &entry.member).and_then(
                |(user_id, member)| Ok((user_id, completed_training(&index, member, &entry)?)),
            );
            match parsed {
                Ok(batch) => batches.push(batch),
                Err(e) => warn!(shard, error = %e, "Dropping unreadable training entry"),
            }
        }
        Ok(batches)
    }

    pub async fn cancel_training(
        &self,
        user_id: u64,
        unit_type: u64,
        slot: Option<u64>,
    ) -> StoreResult<bool> {
        self.tasks
            .cancel(&user_id.to_string(), &member(unit_type, slot))
            .await
    }

    pub async fn training_eta(
        &self,
        user_id: u64,
        unit_type: u64,
        slot: Option<u64>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.tasks
            .due_at(&user_id.to_string(), &member(unit_type, slot))
            .await
    }

    pub async fn speed_up_training(
        &self,
        user_id: u64,
        unit_type: u64,
        slot: Option<u64>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.tasks
            .complete_now(&user_id.to_string(), &member(unit_type, slot), now)
            .await
    }
}

fn member(unit_type: u64, slot: Option<u64>) -> String {
    match slot {
        Some(slot) => format!("{unit_type}:{slot}"),
        None => unit_type.to_string(),
    }
}

fn completed_training(
    index: &StoreKey,
    member: &str,
    entry: &TaskEntry,
) -> StoreResult<CompletedTraining> {
    let bad_member = || StoreError::corrupt(index.as_str(), Some(member), "bad training member");

    let (unit_type, slot) = match member.split_once(':') {
        Some((unit_type, slot)) => (unit_type, Some(slot)),
        None => (member, None),
    };
    let unit_type = unit_type.parse::<u64>().map_err(|_| bad_member())?;
    let slot = slot
        .map(|s| s.parse::<u64>().map_err(|_| bad_member()))
        .transpose()?;

    let unit_count = entry
        .metadata
        .clone()
        .and_then(|meta| serde_json::from_value::<TrainingMetadata>(meta).ok())
        .map_or(1, |meta| meta.unit_count);

    Ok(CompletedTraining {
        unit_type,
        slot,
        unit_count,
        completed_at: entry.due_at,
    })
}

#[async_trait]
impl DomainManager for UnitManager {
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
