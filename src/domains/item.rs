//! Inventory quantities and the item usage queue
//!
//! Record `item:{user_id}` maps item id to quantity. Quantities are bare
//! integers so they can be adjusted atomically in place.

use super::{parse_id, require_future, DomainContext, DomainManager};
use crate::cache::CacheManager;
use crate::error::{StoreError, StoreResult};
use crate::keys::DomainKind;
use crate::tasks::{TaskEntry, TaskManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const KIND: DomainKind = DomainKind::Item;

#[derive(Debug, Clone)]
pub struct ItemManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl ItemManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    /// Replace the user's cached inventory
    pub async fn cache_inventory(
        &self,
        user_id: u64,
        inventory: &BTreeMap<u64, i64>,
    ) -> StoreResult<()> {
        self.cache
            .set_record(
                &user_id.to_string(),
                inventory
                    .iter()
                    .map(|(item_idx, quantity)| (item_idx.to_string(), *quantity)),
            )
            .await
    }

    pub async fn get_inventory(&self, user_id: u64) -> StoreResult<Option<BTreeMap<u64, i64>>> {
        let scope = user_id.to_string();
        let Some(record) = self.cache.get_record::<i64>(&scope).await? else {
            return Ok(None);
        };
        let key = self.cache.record_key(&scope)?;
        record
            .into_iter()
            .map(|(field, quantity)| Ok((parse_id(key.as_str(), &field)?, quantity)))
            .collect::<StoreResult<BTreeMap<_, _>>>()
            .map(Some)
    }

    pub async fn get_quantity(&self, user_id: u64, item_idx: u64) -> StoreResult<Option<i64>> {
        self.cache
            .get_field(&user_id.to_string(), &item_idx.to_string())
            .await
    }

    pub async fn set_quantity(
        &self,
        user_id: u64,
        item_idx: u64,
        quantity: i64,
    ) -> StoreResult<()> {
        require_item(item_idx)?;
        self.cache
            .set_field(&user_id.to_string(), &item_idx.to_string(), &quantity)
            .await
    }

    /// Atomically add `amount` to an item's quantity and return the new quantity
    pub async fn increment_quantity(
        &self,
        user_id: u64,
        item_idx: u64,
        amount: i64,
    ) -> StoreResult<i64> {
        require_item(item_idx)?;
        let quantity = self
            .cache
            .increment_field(&user_id.to_string(), &item_idx.to_string(), amount)
            .await?;
        debug!(user_id, item_idx, amount, quantity, "Item quantity changed");
        Ok(quantity)
    }

    pub async fn decrement_quantity(
        &self,
        user_id: u64,
        item_idx: u64,
        amount: i64,
    ) -> StoreResult<i64> {
        let delta = amount
            .checked_neg()
            .ok_or_else(|| StoreError::invalid_amount(format!("cannot decrement by {amount}")))?;
        self.increment_quantity(user_id, item_idx, delta).await
    }

    pub async fn remove_item(&self, user_id: u64, item_idx: u64) -> StoreResult<bool> {
        self.cache
            .delete_field(&user_id.to_string(), &item_idx.to_string())
            .await
    }

    /// Queue a timed item usage identified by `usage_id`
    pub async fn enqueue_usage<M: Serialize + ?Sized>(
        &self,
        user_id: u64,
        usage_id: &str,
        completes_at: DateTime<Utc>,
        metadata: Option<&M>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        require_future(KIND, completes_at, now)?;
        let scope = user_id.to_string();
        match metadata {
            Some(meta) => {
                self.tasks
                    .schedule_with_metadata(&scope, usage_id, completes_at, meta)
                    .await
            }
            None => self.tasks.schedule(&scope, usage_id, completes_at).await,
        }
    }

    pub async fn usage_completion_time(
        &self,
        user_id: u64,
        usage_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.tasks.due_at(&user_id.to_string(), usage_id).await
    }

    pub async fn get_completed_usages(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<TaskEntry>> {
        self.tasks.pull_due(&user_id.to_string(), now).await
    }
}

fn require_item(item_idx: u64) -> StoreResult<()> {
    if item_idx == 0 {
        return Err(StoreError::invalid_key("item id must be greater than 0"));
    }
    Ok(())
}

#[async_trait]
impl DomainManager for ItemManager {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_inventory_round_trip() {
        let items = ItemManager::new(&DomainContext::in_memory());
        let inventory = BTreeMap::from([(1001, 5), (1002, 1)]);
        items.cache_inventory(42, &inventory).await.unwrap();

        assert_eq!(items.get_inventory(42).await.unwrap(), Some(inventory));
        assert_eq!(items.get_quantity(42, 1001).await.unwrap(), Some(5));
        assert_eq!(items.get_quantity(42, 9999).await.unwrap(), None);
        assert_eq!(items.get_inventory(43).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quantity_changes_are_atomic_increments() {
        let items = ItemManager::new(&DomainContext::in_memory());
        items.set_quantity(42, 1001, 5).await.unwrap();
        assert_eq!(items.increment_quantity(42, 1001, 3).await.unwrap(), 8);
        assert_eq!(items.decrement_quantity(42, 1001, 2).await.unwrap(), 6);
        assert_eq!(items.increment_quantity(42, 1002, 1).await.unwrap(), 1);
        assert!(items.increment_quantity(42, 0, 1).await.is_err());
        assert!(matches!(
            items.decrement_quantity(42, 1001, i64::MIN).await,
            Err(StoreError::InvalidAmount { .. })
        ));
        assert_eq!(items.get_quantity(42, 1001).await.unwrap(), Some(6));

        assert!(items.remove_item(42, 1001).await.unwrap());
        assert_eq!(items.get_quantity(42, 1001).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let items = Arc::new(ItemManager::new(&DomainContext::in_memory()));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let items = Arc::clone(&items);
                tokio::spawn(async move { items.increment_quantity(42, 7, 1).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(items.get_quantity(42, 7).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_usage_queue() {
        let items = ItemManager::new(&DomainContext::in_memory());
        let due = t0() + Duration::minutes(10);
        items
            .enqueue_usage(42, "1001:boost", due, Some(&json!({"count": 2})), t0())
            .await
            .unwrap();
        items
            .enqueue_usage::<serde_json::Value>(42, "1002:shield", due, None, t0())
            .await
            .unwrap();
        assert!(items
            .enqueue_usage::<serde_json::Value>(42, "x", t0(), None, t0())
            .await
            .is_err());

        assert_eq!(
            items.usage_completion_time(42, "1001:boost").await.unwrap(),
            Some(due)
        );
        let done = items.get_completed_usages(42, due).await.unwrap();
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].member, "1001:boost");
        assert_eq!(done[0].metadata, Some(json!({"count": 2})));
    }
}
