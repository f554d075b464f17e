//! Active buff cache and buff expiry queue
//!
//! Unlike the other queues, a buff entry is due when the buff runs out. Pulling
//! expired buffs also drops them from the active-buff record. Shard indices
//! prefix the member with `{user_id}:`.

use super::{
    parse_id, require_future, require_positive, shard_member, shard_scope, split_shard_member,
    DomainContext, DomainManager,
};
use crate::cache::CacheManager;
use crate::error::StoreResult;
use crate::keys::DomainKind;
use crate::tasks::{TaskEntry, TaskManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

const KIND: DomainKind = DomainKind::Buff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBuff {
    pub buff_idx: u64,
    pub buff_type: Option<u32>,
    /// Entity the buff applies to, when not the user itself
    pub target_no: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A buff whose expiry time has passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredBuff {
    pub buff_idx: u64,
    pub buff_type: Option<u32>,
    pub target_no: Option<u64>,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExpiryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    buff_type: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_no: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BuffManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl BuffManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    pub async fn cache_buff(&self, user_id: u64, buff: &ActiveBuff) -> StoreResult<()> {
        self.cache
            .set_field(&user_id.to_string(), &buff.buff_idx.to_string(), buff)
            .await
    }

    pub async fn get_buff(&self, user_id: u64, buff_idx: u64) -> StoreResult<Option<ActiveBuff>> {
        self.cache
            .get_field(&user_id.to_string(), &buff_idx.to_string())
            .await
    }

    /// Cached buffs of the user ordered by buff id; empty when none are cached
    pub async fn get_active_buffs(&self, user_id: u64) -> StoreResult<Vec<ActiveBuff>> {
        let mut buffs: Vec<ActiveBuff> = self
            .cache
            .get_record::<ActiveBuff>(&user_id.to_string())
            .await?
            .map(|record| record.into_values().collect())
            .unwrap_or_default();
        buffs.sort_by_key(|b| b.buff_idx);
        Ok(buffs)
    }

    /// Cached buffs of one type
    pub async fn get_active_buffs_of_type(
        &self,
        user_id: u64,
        buff_type: u32,
    ) -> StoreResult<Vec<ActiveBuff>> {
        let mut buffs = self.get_active_buffs(user_id).await?;
        buffs.retain(|b| b.buff_type == Some(buff_type));
        Ok(buffs)
    }

    pub async fn remove_buff(&self, user_id: u64, buff_idx: u64) -> StoreResult<bool> {
        self.cache
            .delete_field(&user_id.to_string(), &buff_idx.to_string())
            .await
    }

    /// Queue the expiry of a buff
    pub async fn enqueue_expiry(
        &self,
        user_id: u64,
        buff_idx: u64,
        expires_at: DateTime<Utc>,
        buff_type: Option<u32>,
        target_no: Option<u64>,
    ) -> StoreResult<()> {
        self.enqueue_expiry_as_of(
            user_id,
            buff_idx,
            expires_at,
            buff_type,
            target_no,
            Utc::now(),
        )
        .await
    }

    pub async fn enqueue_expiry_as_of(
        &self,
        user_id: u64,
        buff_idx: u64,
        expires_at: DateTime<Utc>,
        buff_type: Option<u32>,
        target_no: Option<u64>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.queue_expiry(
            &user_id.to_string(),
            &buff_idx.to_string(),
            buff_idx,
            expires_at,
            buff_type,
            target_no,
            now,
        )
        .await
    }

    /// Queue a buff expiry on the shard index instead of the user's own
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_expiry_in_shard_as_of(
        &self,
        shard: u32,
        user_id: u64,
        buff_idx: u64,
        expires_at: DateTime<Utc>,
        buff_type: Option<u32>,
        target_no: Option<u64>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.queue_expiry(
            &shard_scope(shard),
            &shard_member(user_id, &buff_idx.to_string()),
            buff_idx,
            expires_at,
            buff_type,
            target_no,
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn queue_expiry(
        &self,
        scope: &str,
        member: &str,
        buff_idx: u64,
        expires_at: DateTime<Utc>,
        buff_type: Option<u32>,
        target_no: Option<u64>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_positive(KIND, "buff id", buff_idx)?;
        require_future(KIND, expires_at, now)?;

        if buff_type.is_none() && target_no.is_none() {
            self.tasks.schedule(scope, member, expires_at).await
        } else {
            self.tasks
                .schedule_with_metadata(
                    scope,
                    member,
                    expires_at,
                    &ExpiryMetadata {
                        buff_type,
                        target_no,
                    },
                )
                .await
        }
    }

    /// Remove and return buffs expired by `now`, dropping them from the cache
    pub async fn get_expired_buffs(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiredBuff>> {
        let scope = user_id.to_string();
        let (index, _) = self.tasks.index_keys(&scope)?;
        let due = self.tasks.pull_due(&scope, now).await?;

        let mut expired = Vec::with_capacity(due.len());
        for entry in due {
            let buff_idx = match parse_id(index.as_str(), &entry.member) {
                Ok(id) => id,
                Err(e) => {
                    warn!(user_id, error = %e, "Dropping unreadable buff expiry");
                    continue;
                }
            };
            expired.push(self.expire(user_id, buff_idx, entry).await);
        }

        if !expired.is_empty() {
            debug!(user_id, count = expired.len(), "Buffs expired");
        }
        Ok(expired)
    }

    /// `(user_id, buff)` of every buff in the shard expired by `now`
    ///
    /// Each expired buff is also dropped from its user's active-buff record.
    pub async fn get_expired_buffs_in_shard(
        &self,
        shard: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(u64, ExpiredBuff)>> {
        let scope = shard_scope(shard);
        let (index, _) = self.tasks.index_keys(&scope)?;
        let due = self.tasks.pull_due(&scope, now).await?;

        let mut expired = Vec::with_capacity(due.len());
        for entry in due {
            let parsed = split_shard_member(index.as_str(), &entry.member)
                .and_then(|(user_id, id)| Ok((user_id, parse_id(index.as_str(), id)?)));
            let (user_id, buff_idx) = match parsed {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(shard, error = %e, "Dropping unreadable buff expiry");
                    continue;
                }
            };
            expired.push((user_id, self.expire(user_id, buff_idx, entry).await));
        }

        if !expired.is_empty() {
            debug!(shard, count = expired.len(), "Buffs expired");
        }
        Ok(expired)
    }

    /// Shape a pulled entry and drop the buff from the user's record
    ///
    /// The entry is already off the index, so a failed cache delete is logged
    /// and the expiry is still returned.
    async fn expire(&self, user_id: u64, buff_idx: u64, entry: TaskEntry) -> ExpiredBuff {
        let meta = entry
            .metadata
            .and_then(|meta| serde_json::from_value::<ExpiryMetadata>(meta).ok())
            .unwrap_or_default();

        if let Err(e) = self
            .cache
            .delete_field(&user_id.to_string(), &buff_idx.to_string())
            .await
        {
            warn!(user_id, buff_idx, error = %e, "Expired buff left in cache");
        }
        ExpiredBuff {
            buff_idx,
            buff_type: meta.buff_type,
            target_no: meta.target_no,
            expired_at: entry.due_at,
        }
    }

    /// Move a queued expiry; false when the buff has no queued expiry
    pub async fn extend_expiry(
        &self,
        user_id: u64,
        buff_idx: u64,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.tasks
            .reschedule(&user_id.to_string(), &buff_idx.to_string(), expires_at)
            .await
    }

    pub async fn buff_expiry(
        &self,
        user_id: u64,
        buff_idx: u64,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.tasks
            .due_at(&user_id.to_string(), &buff_idx.to_string())
            .await
    }
}

#[async_trait]
impl DomainManager for BuffManager {
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
