//! Resource amount cache
//!
//! Record `resource:{user_id}` maps a resource name (`gold`, `food`, ...) to
//! its amount. Amounts change through atomic increments only; this domain
//! has no timed work.

use super::{DomainContext, DomainManager};
use crate::cache::CacheManager;
use crate::error::{StoreError, StoreResult};
use crate::keys::DomainKind;
use crate::tasks::TaskManager;
use async_trait::async_trait;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const KIND: DomainKind = DomainKind::Resource;

#[derive(Debug, Clone)]
pub struct ResourceManager {
    cache: CacheManager,
    tasks: TaskManager,
}

impl ResourceManager {
    pub fn new(context: &DomainContext) -> Self {
        Self {
            cache: context.cache_for(KIND),
            tasks: context.tasks_for(KIND),
        }
    }

    /// Replace every cached amount of the user
    pub async fn set_amounts(
        &self,
        user_id: u64,
        amounts: &BTreeMap<String, i64>,
    ) -> StoreResult<()> {
        for name in amounts.keys() {
            require_name(name)?;
        }
        self.cache
            .set_record(
                &user_id.to_string(),
                amounts.iter().map(|(name, amount)| (name.clone(), *amount)),
            )
            .await
    }

    pub async fn get_amounts(&self, user_id: u64) -> StoreResult<Option<BTreeMap<String, i64>>> {
        Ok(self
            .cache
            .get_record::<i64>(&user_id.to_string())
            .await?
            .map(|record| record.into_iter().collect()))
    }

    pub async fn get_amount(&self, user_id: u64, name: &str) -> StoreResult<Option<i64>> {
        self.cache.get_field(&user_id.to_string(), name).await
    }

    /// Atomically add `delta` (negative to spend) and return the new amount
    ///
    /// No floor is enforced; checking affordability belongs to the caller.
    pub async fn change_amount(&self, user_id: u64, name: &str, delta: i64) -> StoreResult<i64> {
        require_name(name)?;
        let amount = self
            .cache
            .increment_field(&user_id.to_string(), name, delta)
            .await?;
        debug!(user_id, resource = name, delta, amount, "Resource amount changed");
        Ok(amount)
    }
}

fn require_name(name: &str) -> StoreResult<()> {
    if name.trim().is_empty() {
        return Err(StoreError::invalid_key("resource name must not be empty"));
    }
    Ok(())
}

#[async_trait]
impl DomainManager for ResourceManager {
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
