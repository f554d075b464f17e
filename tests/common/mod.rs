//! Shared fixtures for integration tests

#![allow(dead_code)]

pub mod strategies;

use chrono::{DateTime, TimeZone, Utc};
use game_state_cache::{GameCache, GameCacheConfig, StoreClient};
use std::sync::Arc;

/// Fixed reference time so due-time arithmetic is reproducible
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(seconds)
}

/// Facade over a fresh in-process store
pub fn memory_cache() -> GameCache {
    GameCache::in_memory()
}

/// Facade over a fresh in-process store with a customised configuration
pub fn memory_cache_with(configure: impl FnOnce(&mut GameCacheConfig)) -> GameCache {
    let mut config = GameCacheConfig::in_memory();
    configure(&mut config);
    GameCache::new(StoreClient::in_memory(), Arc::new(config))
}
