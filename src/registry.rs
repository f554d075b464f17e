//! # Manager Registry
//!
//! Lazily constructs one [`DomainManager`] per [`DomainKind`] and hands out
//! shared handles to it. Construction happens inside the map entry, so
//! concurrent first requests for the same domain build exactly one instance.

use crate::domains::{build_manager, DomainContext, DomainManager};
use crate::error::{StoreError, StoreResult};
use crate::keys::DomainKind;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Domain name to live manager instance
#[derive(Debug)]
pub struct ManagerRegistry {
    context: DomainContext,
    managers: DashMap<DomainKind, Arc<dyn DomainManager>>,
    constructions: AtomicUsize,
}

impl ManagerRegistry {
    pub fn new(context: DomainContext) -> Self {
        Self {
            context,
            managers: DashMap::new(),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn context(&self) -> &DomainContext {
        &self.context
    }

    /// Manager for a domain name such as `"building"`
    pub fn get(&self, name: &str) -> StoreResult<Arc<dyn DomainManager>> {
        let kind: DomainKind = name.parse()?;
        Ok(self.get_or_create(kind))
    }

    /// Existing manager for `kind`, constructing and registering it on first use
    pub fn get_or_create(&self, kind: DomainKind) -> Arc<dyn DomainManager> {
        if let Some(manager) = self.managers.get(&kind) {
            return Arc::clone(manager.value());
        }

        let manager = self.managers.entry(kind).or_insert_with(|| {
            self.constructions.fetch_add(1, Ordering::Relaxed);
            info!(domain = %kind, "Domain manager constructed");
            build_manager(kind, &self.context)
        });
        Arc::clone(manager.value())
    }

    /// Concrete manager type for `kind`
    ///
    /// Fails with `UnknownDomain` when `T` is not the type registered for `kind`.
    pub fn get_typed<T>(&self, kind: DomainKind) -> StoreResult<Arc<T>>
    where
        T: DomainManager + 'static,
    {
        self.get_or_create(kind)
            .into_any()
            .downcast::<T>()
            .map_err(|_| {
                debug!(domain = %kind, "Manager type mismatch");
                StoreError::UnknownDomain(format!(
                    "{kind} is not served by {}",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Managers constructed so far, ordered by domain
    pub fn constructed(&self) -> Vec<Arc<dyn DomainManager>> {
        let mut managers: Vec<(DomainKind, Arc<dyn DomainManager>)> = self
            .managers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        managers.sort_by_key(|(kind, _)| *kind);
        managers.into_iter().map(|(_, manager)| manager).collect()
    }

    pub fn is_constructed(&self, kind: DomainKind) -> bool {
        self.managers.contains_key(&kind)
    }

    /// Number of managers built over the registry's lifetime
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{BuildingManager, UnitManager};

    #[test]
    fn test_managers_are_built_lazily_and_reused() {
        let registry = ManagerRegistry::new(DomainContext::in_memory());
        assert_eq!(registry.construction_count(), 0);
        assert!(!registry.is_constructed(DomainKind::Building));

        let first = registry.get("building").unwrap();
        let second = registry.get_or_create(DomainKind::Building);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.construction_count(), 1);
        assert!(registry.is_constructed(DomainKind::Building));
    }

    #[test]
    fn test_unknown_domain_name() {
        let registry = ManagerRegistry::new(DomainContext::in_memory());
        assert!(matches!(
            registry.get("dragon"),
            Err(StoreError::UnknownDomain(ref name)) if name == "dragon"
        ));
        assert_eq!(registry.construction_count(), 0);
    }

    #[test]
    fn test_typed_access() {
        let registry = ManagerRegistry::new(DomainContext::in_memory());
        let typed = registry
            .get_typed::<BuildingManager>(DomainKind::Building)
            .unwrap();
        assert_eq!(typed.kind(), DomainKind::Building);

        assert!(registry
            .get_typed::<UnitManager>(DomainKind::Building)
            .is_err());
        assert_eq!(registry.construction_count(), 1);
    }

    #[test]
    fn test_constructed_is_ordered_by_domain() {
        let registry = ManagerRegistry::new(DomainContext::in_memory());
        registry.get_or_create(DomainKind::Resource);
        registry.get_or_create(DomainKind::Building);
        registry.get_or_create(DomainKind::Mission);

        let kinds: Vec<DomainKind> = registry.constructed().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![DomainKind::Building, DomainKind::Mission, DomainKind::Resource]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_builds_one_instance() {
        let registry = Arc::new(ManagerRegistry::new(DomainContext::in_memory()));
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.get_or_create(DomainKind::Unit)
                })
            })
            .collect();

        let mut managers = Vec::new();
        for handle in handles {
            managers.push(handle.await.unwrap());
        }
        assert!(managers.iter().all(|m| Arc::ptr_eq(m, &managers[0])));
        assert_eq!(registry.construction_count(), 1);
    }
}
