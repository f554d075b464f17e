//! # Completion-Time Task Queue
//!
//! [`TaskManager`] keeps one sorted index per scope under
//! `{domain}:tasks:{scope}`, scored by due time in epoch milliseconds. Each
//! member appears at most once; scheduling an existing member moves it.
//!
//! Optional per-entry metadata lives in the companion hash
//! `{domain}:tasks:{scope}:meta` and is written, cancelled and pulled
//! together with its entry.
//!
//! [`TaskManager::pull_due`] is the hot path: it reads and removes every due
//! entry in one atomic server-side step, so concurrent workers polling the
//! same index never both receive an entry.

use crate::config::TaskQueueConfig;
use crate::error::{StoreError, StoreResult};
use crate::keys::{Namespace, StoreKey};
use crate::store::{DueMember, StoreClient};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Order among entries that share one due timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lexicographic by member, the store's native order
    #[default]
    MemberAscending,
    /// Reverse lexicographic by member
    MemberDescending,
}

impl TieBreak {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            TieBreak::MemberAscending => a.cmp(b),
            TieBreak::MemberDescending => b.cmp(a),
        }
    }
}

/// Queue behaviour shared by every domain's task manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSettings {
    pub tie_break: TieBreak,
    /// Upper bound on entries removed by one pull
    pub max_batch: Option<usize>,
}

impl From<&TaskQueueConfig> for TaskSettings {
    fn from(config: &TaskQueueConfig) -> Self {
        Self {
            tie_break: config.tie_break,
            max_batch: config.max_batch,
        }
    }
}

/// One scheduled entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEntry {
    pub member: String,
    pub due_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Counts for one index at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: u64,
    /// Entries with due time at or before the reference time
    pub due: u64,
    pub pending: u64,
}

/// Sorted-set task index for one domain namespace
#[derive(Debug, Clone)]
pub struct TaskManager {
    store: StoreClient,
    namespace: Namespace,
    settings: TaskSettings,
}

impl TaskManager {
    pub fn new(store: StoreClient, namespace: Namespace, settings: TaskSettings) -> Self {
        Self {
            store,
            namespace,
            settings,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn settings(&self) -> TaskSettings {
        self.settings
    }

    pub fn max_batch(&self) -> Option<usize> {
        self.settings.max_batch
    }

    /// Index and metadata keys for `scope`
    pub fn index_keys(&self, scope: &str) -> StoreResult<(StoreKey, StoreKey)> {
        let index = StoreKey::task_index(&self.namespace, scope)?;
        let metadata = StoreKey::task_metadata(&index);
        Ok((index, metadata))
    }

    /// Insert `member` due at `due_at`, or move it there if already queued
    ///
    /// Any metadata left from an earlier schedule of the same member is cleared.
    pub async fn schedule(
        &self,
        scope: &str,
        member: &str,
        due_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.schedule_raw(scope, member, due_at, None).await
    }

    /// Like [`schedule`](Self::schedule), storing `metadata` alongside the entry
    pub async fn schedule_with_metadata<M>(
        &self,
        scope: &str,
        member: &str,
        due_at: DateTime<Utc>,
        metadata: &M,
    ) -> StoreResult<()>
    where
        M: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(metadata)?;
        self.schedule_raw(scope, member, due_at, Some(&raw)).await
    }

    async fn schedule_raw(
        &self,
        scope: &str,
        member: &str,
        due_at: DateTime<Utc>,
        metadata: Option<&str>,
    ) -> StoreResult<()> {
        validate_member(member)?;
        let (index, meta) = self.index_keys(scope)?;
        self.store
            .schedule(
                index.as_str(),
                meta.as_str(),
                member,
                score_of(due_at),
                metadata,
            )
            .await?;
        debug!(index = %index, member, due_at = %due_at, "Task scheduled");
        Ok(())
    }

    /// Atomically remove and return every entry due at or before `now`
    ///
    /// Entries come back ascending by due time, ties ordered by the configured
    /// [`TieBreak`]. With `max_batch` set, at most that many of the earliest
    /// entries are taken; the rest stay queued for the next pull.
    ///
    /// Removal happens before anything is decoded, so an entry whose score is
    /// not a valid timestamp is logged and skipped rather than failing the
    /// whole batch. A pull that times out may still have run on the server;
    /// its entries are then gone from the index without reaching any caller.
    pub async fn pull_due(&self, scope: &str, now: DateTime<Utc>) -> StoreResult<Vec<TaskEntry>> {
        let (index, meta) = self.index_keys(scope)?;
        let mut due = self
            .store
            .pull_due(
                index.as_str(),
                meta.as_str(),
                score_of(now),
                self.settings.max_batch,
            )
            .await?;

        let tie_break = self.settings.tie_break;
        due.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| tie_break.compare(&a.member, &b.member))
        });

        if !due.is_empty() {
            debug!(index = %index, count = due.len(), "Pulled due tasks");
        }

        Ok(due
            .into_iter()
            .filter_map(|entry| {
                let member = entry.member.clone();
                match self.to_entry(&index, entry) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(
                            index = %index,
                            member = %member,
                            error = %e,
                            "Dropping pulled task with unreadable due time"
                        );
                        None
                    }
                }
            })
            .collect())
    }

    /// Remove a queued entry and its metadata; false when it was not queued
    pub async fn cancel(&self, scope: &str, member: &str) -> StoreResult<bool> {
        let (index, meta) = self.index_keys(scope)?;
        let removed = self
            .store
            .unschedule(index.as_str(), meta.as_str(), member)
            .await?;
        debug!(index = %index, member, removed, "Task cancelled");
        Ok(removed)
    }

    /// Earliest entry without removing it
    pub async fn peek_next(&self, scope: &str) -> StoreResult<Option<TaskEntry>> {
        let (index, meta) = self.index_keys(scope)?;
        let first = self
            .store
            .zrange_by_score(index.as_str(), f64::NEG_INFINITY, f64::INFINITY, Some(1))
            .await?;
        let Some(first) = first.into_iter().next() else {
            return Ok(None);
        };

        let next = match self.settings.tie_break {
            TieBreak::MemberAscending => first,
            TieBreak::MemberDescending => self
                .store
                .zrange_by_score(index.as_str(), first.score, first.score, None)
                .await?
                .into_iter()
                .last()
                .unwrap_or(first),
        };

        let metadata = self.store.hget(meta.as_str(), &next.member).await?;
        self.to_entry(
            &index,
            DueMember {
                member: next.member,
                score: next.score,
                metadata,
            },
        )
        .map(Some)
    }

    /// Scheduled due time of one member
    pub async fn due_at(&self, scope: &str, member: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let (index, _) = self.index_keys(scope)?;
        self.store
            .zscore(index.as_str(), member)
            .await?
            .map(|score| time_of(&index, score))
            .transpose()
    }

    /// Every queued entry, ascending by due time, without removing any
    pub async fn pending(&self, scope: &str) -> StoreResult<Vec<TaskEntry>> {
        let (index, meta) = self.index_keys(scope)?;
        let mut members = self
            .store
            .zrange_by_score(index.as_str(), f64::NEG_INFINITY, f64::INFINITY, None)
            .await?;
        if members.is_empty() {
            return Ok(Vec::new());
        }

        let tie_break = self.settings.tie_break;
        members.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| tie_break.compare(&a.member, &b.member))
        });

        let names: Vec<String> = members.iter().map(|m| m.member.clone()).collect();
        let metadata = self.store.hmget(meta.as_str(), &names).await?;

        members
            .into_iter()
            .zip(metadata)
            .map(|(scored, metadata)| {
                self.to_entry(
                    &index,
                    DueMember {
                        member: scored.member,
                        score: scored.score,
                        metadata,
                    },
                )
            })
            .collect()
    }

    pub async fn queue_status(&self, scope: &str, now: DateTime<Utc>) -> StoreResult<QueueStatus> {
        let (index, _) = self.index_keys(scope)?;
        let total = self.store.zcard(index.as_str()).await?;
        let due = self
            .store
            .zcount(index.as_str(), f64::NEG_INFINITY, score_of(now))
            .await?;
        Ok(QueueStatus {
            total,
            due,
            pending: total.saturating_sub(due),
        })
    }

    /// Drop entries due at or before `cutoff`, with their metadata; returns how many
    pub async fn purge_older_than(&self, scope: &str, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let (index, meta) = self.index_keys(scope)?;
        let purged = self
            .store
            .pull_due(index.as_str(), meta.as_str(), score_of(cutoff), None)
            .await?
            .len();
        if purged > 0 {
            debug!(index = %index, purged, cutoff = %cutoff, "Purged stale tasks");
        }
        Ok(purged)
    }

    /// Move a queued entry to `due_at`, keeping its metadata
    ///
    /// Returns false, and queues nothing, when the member is not queued.
    pub async fn reschedule(
        &self,
        scope: &str,
        member: &str,
        due_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let (index, _) = self.index_keys(scope)?;
        let moved = self
            .store
            .zadd_existing(index.as_str(), member, score_of(due_at))
            .await?;
        debug!(index = %index, member, moved, due_at = %due_at, "Task rescheduled");
        Ok(moved)
    }

    /// Make a queued entry due immediately
    pub async fn complete_now(
        &self,
        scope: &str,
        member: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.reschedule(scope, member, now).await
    }

    fn to_entry(&self, index: &StoreKey, entry: DueMember) -> StoreResult<TaskEntry> {
        let due_at = time_of(index, entry.score)?;
        let metadata = entry.metadata.and_then(|raw| {
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        index = %index,
                        member = %entry.member,
                        error = %e,
                        "Task metadata failed to deserialize, dropping it"
                    );
                    None
                }
            }
        });
        Ok(TaskEntry {
            member: entry.member,
            due_at,
            metadata,
        })
    }
}

/// Index score for a due time: epoch milliseconds
pub fn score_of(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

fn time_of(index: &StoreKey, score: f64) -> StoreResult<DateTime<Utc>> {
    if !score.is_finite() {
        return Err(StoreError::corrupt(
            index.as_str(),
            None,
            format!("score {score} is not a timestamp"),
        ));
    }
    DateTime::from_timestamp_millis(score as i64).ok_or_else(|| {
        StoreError::corrupt(
            index.as_str(),
            None,
            format!("score {score} is out of the timestamp range"),
        )
    })
}

fn validate_member(member: &str) -> StoreResult<()> {
    if member.is_empty() {
        return Err(StoreError::invalid_key("task member must not be empty"));
    }
    Ok(())
}
