//! Research level cache and research completion queue

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

const KIND: DomainKind = DomainKind::Research;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchState {
    pub research_idx: u64,
    pub research_lv: u32,
    /// 0 idle, 1 researching
    pub status: u8,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ResearchManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl ResearchManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    pub async fn cache_research(&self, user_id: u64, state: &ResearchState) -> StoreResult<()> {
        self.cache
            .set_field(&user_id.to_string(), &state.research_idx.to_string(), state)
            .await
    }

    pub async fn get_research(
        &self,
        user_id: u64,
        research_id: u64,
    ) -> StoreResult<Option<ResearchState>> {
        self.cache
            .get_field(&user_id.to_string(), &research_id.to_string())
            .await
    }

    pub async fn get_all_research(
        &self,
        user_id: u64,
    ) -> StoreResult<Option<BTreeMap<u64, ResearchState>>> {
        let scope = user_id.to_string();
        let Some(record) = self.cache.get_record::<ResearchState>(&scope).await? else {
            return Ok(None);
        };
        let key = self.cache.record_key(&scope)?;
        record
            .into_iter()
            .map(|(field, state)| Ok((parse_id(key.as_str(), &field)?, state)))
            .collect::<StoreResult<BTreeMap<_, _>>>()
            .map(Some)
    }

    pub async fn enqueue_research(
        &self,
        user_id: u64,
        research_id: u64,
        completes_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.enqueue_research_as_of(user_id, research_id, completes_at, Utc::now())
            .await
    }

    pub async fn enqueue_research_as_of(
        &self,
        user_id: u64,
        research_id: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_positive(KIND, "research id", research_id)?;
        require_future(KIND, completes_at, now)?;
        self.tasks
            .schedule(&user_id.to_string(), &research_id.to_string(), completes_at)
            .await?;
        info!(user_id, research_id, completes_at = %completes_at, "Research queued");
        Ok(())
    }

    /// Remove and return ids of research finished by `now`, earliest first
    pub async fn get_completed_research(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<u64>> {
        let scope = user_id.to_string();
        let (index, _) = self.tasks.index_keys(&scope)?;
        let completed = self.tasks.pull_due(&scope, now).await?;
        Ok(completed
            .into_iter()
            .filter_map(|entry| match parse_id(index.as_str(), &entry.member) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(user_id, error = %e, "Dropping unreadable research entry");
                    None
                }
            })
            .collect())
    }

    pub async fn enqueue_research_in_shard_as_of(
        &self,
        shard: u32,
        user_id: u64,
        research_id: u64,
        completes_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_positive(KIND, "research id", research_id)?;
        require_future(KIND, completes_at, now)?;
        self.tasks
            .schedule(
                &shard_scope(shard),
                &shard_member(user_id, &research_id.to_string()),
                completes_at,
            )
            .await?;
        info!(shard, user_id, research_id, completes_at = %completes_at, "Research queued");
        Ok(())
    }

    /// `(user_id, research_id)` of research in the shard finished by `now`
    pub async fn get_completed_research_in_shard(
        &self,
        shard: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(u64, u64)>> {
        let scope = shard_scope(shard);
        let (index, _) = self.tasks.index_keys(&scope)?;
        let completed = self.tasks.pull_due(&scope, now).await?;
        Ok(completed
            .into_iter()
            .filter_map(|entry| {
                let parsed = split_shard_member(index.as_str(), &entry.member)
                    .and_then(|(user_id, id)| Ok((user_id, parse_id(index.as_str(), id)?)));
                match parsed {
                    Ok(done) => Some(done),
                    Err(e) => {
                        warn!(shard, error = %e, "Dropping unreadable research entry");
                        None
                    }
                }
            })
            .collect())
    }

    pub async fn cancel_research(&self, user_id: u64, research_id: u64) -> StoreResult<bool> {
        self.tasks
            .cancel(&user_id.to_string(), &research_id.to_string())
            .await
    }

    pub async fn research_eta(
        &self,
        user_id: u64,
        research_id: u64,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.tasks
            .due_at(&user_id.to_string(), &research_id.to_string())
            .await
    }

    pub async fn speed_up_research(
        &self,
        user_id: u64,
        research_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.tasks
            .complete_now(&user_id.to_string(), &research_id.to_string(), now)
            .await
    }
}

#[async_trait]
impl DomainManager for ResearchManager {
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
