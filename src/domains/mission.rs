//! Mission progress cache
//!
//! Each mission's attributes live in their own fields of `mission:{user_id}`:
//!
//! | field | value |
//! |---|---|
//! | `{mission}.current_value` | progress counter |
//! | `{mission}.is_completed` | `true` once completed |
//! | `{mission}.completed_at` | completion timestamp |
//! | `{mission}.claimed` | claim counter, 1 after the first claim |
//!
//! Splitting the attributes lets progress updates and reward claims run as
//! single-field atomic operations. A scalar `mission:{user_id}:meta` records
//! when the map was last loaded.

use super::{parse_id, DomainContext, DomainManager};
use crate::cache::CacheManager;
use crate::error::{StoreError, StoreResult};
use crate::keys::DomainKind;
use crate::tasks::TaskManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const KIND: DomainKind = DomainKind::Mission;
const META: &str = "meta";

const CURRENT_VALUE: &str = "current_value";
const IS_COMPLETED: &str = "is_completed";
const COMPLETED_AT: &str = "completed_at";
const CLAIMED: &str = "claimed";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub current_value: i64,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// When the user's mission map was loaded and how many missions it held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionCacheMeta {
    pub cached_at: DateTime<Utc>,
    pub mission_count: usize,
}

/// Result of a reward claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed,
    NotCompleted,
    AlreadyClaimed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct MissionManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl MissionManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    /// Replace the user's mission map and stamp its meta entry
    pub async fn cache_progress(
        &self,
        user_id: u64,
        missions: &BTreeMap<u64, MissionProgress>,
    ) -> StoreResult<()> {
        self.cache_progress_as_of(user_id, missions, Utc::now()).await
    }

    pub async fn cache_progress_as_of(
        &self,
        user_id: u64,
        missions: &BTreeMap<u64, MissionProgress>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let scope = user_id.to_string();
        let mut fields = Vec::with_capacity(missions.len() * 4);
        for (mission_idx, progress) in missions {
            let idx = *mission_idx;
            fields.push((field(idx, CURRENT_VALUE), Value::from(progress.current_value)));
            fields.push((field(idx, IS_COMPLETED), Value::from(progress.is_completed)));
            fields.push((field(idx, CLAIMED), Value::from(i64::from(progress.is_claimed))));
            if let Some(completed_at) = progress.completed_at {
                fields.push((field(idx, COMPLETED_AT), serde_json::to_value(completed_at)?));
            }
        }

        self.cache.set_record(&scope, fields).await?;
        self.cache
            .set_value(
                &scope,
                META,
                &MissionCacheMeta {
                    cached_at: now,
                    mission_count: missions.len(),
                },
            )
            .await?;
        info!(user_id, missions = missions.len(), "Mission progress cached");
        Ok(())
    }

    /// The user's whole mission map; `None` when nothing is cached
    pub async fn get_progress(
        &self,
        user_id: u64,
    ) -> StoreResult<Option<BTreeMap<u64, MissionProgress>>> {
        let scope = user_id.to_string();
        let Some(record) = self.cache.get_record::<Value>(&scope).await? else {
            return Ok(None);
        };
        let key = self.cache.record_key(&scope)?;

        let mut missions: BTreeMap<u64, MissionProgress> = BTreeMap::new();
        for (name, value) in record {
            let Some((mission, attribute)) = name.split_once('.') else {
                continue;
            };
            let mission_idx = parse_id(key.as_str(), mission)?;
            let progress = missions.entry(mission_idx).or_default();
            apply(progress, attribute, &value).map_err(|reason| {
                StoreError::corrupt(key.as_str(), Some(name.as_str()), reason)
            })?;
        }
        Ok(Some(missions))
    }

    pub async fn get_mission(
        &self,
        user_id: u64,
        mission_idx: u64,
    ) -> StoreResult<Option<MissionProgress>> {
        let scope = user_id.to_string();
        let names: Vec<String> = [CURRENT_VALUE, IS_COMPLETED, COMPLETED_AT, CLAIMED]
            .iter()
            .map(|attribute| field(mission_idx, attribute))
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let values = self.cache.get_fields::<Value>(&scope, &refs).await?;
        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let key = self.cache.record_key(&scope)?;
        let mut progress = MissionProgress::default();
        for ((name, attribute), value) in names
            .iter()
            .zip([CURRENT_VALUE, IS_COMPLETED, COMPLETED_AT, CLAIMED])
            .zip(values)
        {
            if let Some(value) = value {
                apply(&mut progress, attribute, &value).map_err(|reason| {
                    StoreError::corrupt(key.as_str(), Some(name.as_str()), reason)
                })?;
            }
        }
        Ok(Some(progress))
    }

    /// Set a mission's progress counter, creating the entry if needed
    pub async fn update_progress(
        &self,
        user_id: u64,
        mission_idx: u64,
        current_value: i64,
    ) -> StoreResult<()> {
        self.cache
            .set_field(
                &user_id.to_string(),
                &field(mission_idx, CURRENT_VALUE),
                &current_value,
            )
            .await
    }

    /// Atomically add to a mission's progress counter and return the new value
    pub async fn add_progress(
        &self,
        user_id: u64,
        mission_idx: u64,
        delta: i64,
    ) -> StoreResult<i64> {
        self.cache
            .increment_field(&user_id.to_string(), &field(mission_idx, CURRENT_VALUE), delta)
            .await
    }

    pub async fn mark_completed(&self, user_id: u64, mission_idx: u64) -> StoreResult<()> {
        self.mark_completed_as_of(user_id, mission_idx, Utc::now()).await
    }

    /// Flag a mission completed; an existing claim is left as is
    pub async fn mark_completed_as_of(
        &self,
        user_id: u64,
        mission_idx: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.cache
            .set_fields(
                &user_id.to_string(),
                [
                    (field(mission_idx, IS_COMPLETED), Value::Bool(true)),
                    (field(mission_idx, COMPLETED_AT), serde_json::to_value(now)?),
                ],
            )
            .await?;
        debug!(user_id, mission_idx, "Mission completed");
        Ok(())
    }

    /// Claim a completed mission's reward
    ///
    /// The claim counter is incremented atomically, so of several concurrent
    /// claims exactly one sees [`ClaimOutcome::Claimed`].
    pub async fn mark_claimed(&self, user_id: u64, mission_idx: u64) -> StoreResult<ClaimOutcome> {
        let scope = user_id.to_string();
        let completed = field(mission_idx, IS_COMPLETED);
        let current = field(mission_idx, CURRENT_VALUE);
        let state = self
            .cache
            .get_fields::<Value>(&scope, &[completed.as_str(), current.as_str()])
            .await?;

        let outcome = match state.as_slice() {
            [None, None] => ClaimOutcome::Unknown,
            [Some(Value::Bool(true)), _] => {
                let claims = self
                    .cache
                    .increment_field(&scope, &field(mission_idx, CLAIMED), 1)
                    .await?;
                if claims == 1 {
                    ClaimOutcome::Claimed
                } else {
                    ClaimOutcome::AlreadyClaimed
                }
            }
            _ => ClaimOutcome::NotCompleted,
        };
        debug!(user_id, mission_idx, ?outcome, "Mission claim");
        Ok(outcome)
    }

    pub async fn cache_meta(&self, user_id: u64) -> StoreResult<Option<MissionCacheMeta>> {
        self.cache.get_value(&user_id.to_string(), META).await
    }
}

fn field(mission_idx: u64, attribute: &str) -> String {
    format!("{mission_idx}.{attribute}")
}

fn apply(progress: &mut MissionProgress, attribute: &str, value: &Value) -> Result<(), String> {
    match attribute {
        CURRENT_VALUE => {
            progress.current_value = value
                .as_i64()
                .ok_or_else(|| format!("expected an integer, found {value}"))?;
        }
        IS_COMPLETED => {
            progress.is_completed = value
                .as_bool()
                .ok_or_else(|| format!("expected a boolean, found {value}"))?;
        }
        COMPLETED_AT => {
            progress.completed_at =
                serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        }
        CLAIMED => {
            let claims = value
                .as_i64()
                .ok_or_else(|| format!("expected an integer, found {value}"))?;
            progress.is_claimed = claims >= 1;
        }
        _ => {}
    }
    Ok(())
}

#[async_trait]
impl DomainManager for MissionManager {
    fn kind(&self) -> DomainKind {
        KIND
    }

    fn cache(&self) -> &CacheManager {
        &self.cache
    }

    fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Drops the meta entry along with the mission map
    async fn evict(&self, scope: &str) -> StoreResult<bool> {
        let record = self.cache.delete_record(scope).await?;
        let meta = self.cache.delete_value(scope, META).await?;
        Ok(record || meta)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn missions() -> BTreeMap<u64, MissionProgress> {
        BTreeMap::from([
            (
                1,
                MissionProgress {
                    current_value: 10,
                    is_completed: true,
                    is_claimed: false,
                    completed_at: Some(t0()),
                },
            ),
            (
                2,
                MissionProgress {
                    current_value: 3,
                    ..MissionProgress::default()
                },
            ),
        ])
    }

    #[tokio::test]
    async fn test_cache_and_read_progress() {
        let mission = MissionManager::new(&DomainContext::in_memory());
        mission.cache_progress_as_of(42, &missions(), t0()).await.unwrap();

        assert_eq!(mission.get_progress(42).await.unwrap(), Some(missions()));
        assert_eq!(mission.get_mission(42, 1).await.unwrap(), missions().get(&1).cloned());
        assert_eq!(mission.get_mission(42, 9).await.unwrap(), None);
        assert_eq!(
            mission.cache_meta(42).await.unwrap(),
            Some(MissionCacheMeta {
                cached_at: t0(),
                mission_count: 2,
            })
        );
        assert_eq!(mission.get_progress(43).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_progress_creates_entry() {
        let mission = MissionManager::new(&DomainContext::in_memory());
        mission.update_progress(42, 5, 7).await.unwrap();
        assert_eq!(mission.add_progress(42, 5, 3).await.unwrap(), 10);

        let progress = mission.get_mission(42, 5).await.unwrap().unwrap();
        assert_eq!(progress.current_value, 10);
        assert!(!progress.is_completed);
        assert!(!progress.is_claimed);
    }

    #[tokio::test]
    async fn test_claim_rules() {
        let mission = MissionManager::new(&DomainContext::in_memory());
        assert_eq!(mission.mark_claimed(42, 1).await.unwrap(), ClaimOutcome::Unknown);

        mission.update_progress(42, 1, 4).await.unwrap();
        assert_eq!(
            mission.mark_claimed(42, 1).await.unwrap(),
            ClaimOutcome::NotCompleted
        );

        mission.mark_completed_as_of(42, 1, t0()).await.unwrap();
        assert_eq!(mission.mark_claimed(42, 1).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(
            mission.mark_claimed(42, 1).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );

        // completing again must not reopen the claim
        mission.mark_completed_as_of(42, 1, t0()).await.unwrap();
        assert_eq!(
            mission.mark_claimed(42, 1).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        let progress = mission.get_mission(42, 1).await.unwrap().unwrap();
        assert!(progress.is_claimed);
        assert_eq!(progress.completed_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_concurrent_claims_succeed_once() {
        let mission = Arc::new(MissionManager::new(&DomainContext::in_memory()));
        mission.mark_completed_as_of(42, 3, t0()).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let mission = Arc::clone(&mission);
                tokio::spawn(async move { mission.mark_claimed(42, 3).await.unwrap() })
            })
            .collect();
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() == ClaimOutcome::Claimed {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_claim_status_loaded_from_cache() {
        let mission = MissionManager::new(&DomainContext::in_memory());
        let mut loaded = missions();
        if let Some(first) = loaded.get_mut(&1) {
            first.is_claimed = true;
        }
        mission.cache_progress_as_of(42, &loaded, t0()).await.unwrap();
        assert_eq!(
            mission.mark_claimed(42, 1).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[tokio::test]
    async fn test_evict_removes_meta() {
        let mission = MissionManager::new(&DomainContext::in_memory());
        mission.cache_progress_as_of(42, &missions(), t0()).await.unwrap();

        assert!(mission.evict("42").await.unwrap());
        assert_eq!(mission.cache_meta(42).await.unwrap(), None);
        assert_eq!(mission.get_progress(42).await.unwrap(), None);
        assert!(!mission.evict("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_attribute_is_reported() {
        let context = DomainContext::in_memory();
        let mission = MissionManager::new(&context);
        context
            .store
            .hset("mission:42", "1.is_completed", "\"yes\"", None)
            .await
            .unwrap();
        assert!(mission.get_progress(42).await.unwrap_err().is_cache_miss());
    }
}
