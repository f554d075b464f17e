//! Live Redis checks; run with `--features test-services` and `REDIS_URL` set

#![cfg(feature = "test-services")]

mod common;

use common::{at, t0};
use game_state_cache::config::{StoreBackendKind, StoreConfig};
use game_state_cache::domains::ClaimOutcome;
use game_state_cache::{GameCache, GameCacheConfig};
use std::collections::HashSet;
use uuid::Uuid;

fn redis_config() -> GameCacheConfig {
    GameCacheConfig {
        store: StoreConfig {
            backend: StoreBackendKind::Redis,
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            ..StoreConfig::default()
        },
        ..GameCacheConfig::default()
    }
}

async fn redis_cache() -> GameCache {
    GameCache::connect(&redis_config()).await.unwrap()
}

/// User id unique to one test run so parallel runs never share keys
fn unique_user() -> u64 {
    (Uuid::new_v4().as_u128() as u64) >> 1
}

#[tokio::test]
async fn test_redis_building_flow() {
    let cache = redis_cache().await;
    assert!(cache.health_check().await);
    assert_eq!(cache.store().provider_name(), "redis");

    let user = unique_user();
    let buildings = cache.building().unwrap();
    buildings.enqueue_upgrade_as_of(user, 7, at(10), t0()).await.unwrap();

    assert!(buildings.get_completed_upgrades(user, at(5)).await.unwrap().is_empty());
    assert_eq!(buildings.get_completed_upgrades(user, at(11)).await.unwrap(), vec![7]);
    assert!(buildings.get_completed_upgrades(user, at(12)).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_pulls_are_exactly_once() {
    let cache = redis_cache().await;
    let user = unique_user();
    let tasks = cache.unit().unwrap();
    for unit_type in 1..=100u64 {
        tasks
            .enqueue_training_as_of(user, unit_type, None, 1, at(unit_type as i64 % 10 + 1), t0())
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .unit()
                    .unwrap()
                    .get_completed_training(user, at(20))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for batch in handle.await.unwrap() {
            assert!(seen.insert(batch.unit_type));
        }
    }
    assert_eq!(seen.len(), 100);
}

#[tokio::test]
async fn test_redis_metadata_and_speed_up() {
    let cache = redis_cache().await;
    let user = unique_user();
    let buffs = cache.buff().unwrap();
    buffs
        .enqueue_expiry_as_of(user, 5, at(600), Some(3), Some(77), t0())
        .await
        .unwrap();
    assert!(buffs.extend_expiry(user, 5, at(900)).await.unwrap());
    assert!(!buffs.extend_expiry(user, 6, at(900)).await.unwrap());

    let expired = buffs.get_expired_buffs(user, at(900)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].buff_type, Some(3));
    assert_eq!(expired[0].target_no, Some(77));
    assert_eq!(expired[0].expired_at, at(900));
}

#[tokio::test]
async fn test_redis_field_cache_and_ttl() {
    let cache = redis_cache().await;
    let user = unique_user();
    let resources = cache.resource().unwrap();
    resources
        .set_amounts(user, &[("gold".to_string(), 100)].into_iter().collect())
        .await
        .unwrap();
    assert_eq!(resources.change_amount(user, "gold", -40).await.unwrap(), 60);

    let info = cache.inspect_key(&format!("resource:{user}")).await.unwrap();
    assert!(info.exists);
    assert_eq!(info.key_type, "hash");
    assert!(info.ttl_seconds.is_some());

    let mission = cache.mission().unwrap();
    mission.mark_completed_as_of(user, 9, t0()).await.unwrap();
    assert_eq!(mission.mark_claimed(user, 9).await.unwrap(), ClaimOutcome::Claimed);
    assert_eq!(mission.mark_claimed(user, 9).await.unwrap(), ClaimOutcome::AlreadyClaimed);
}
