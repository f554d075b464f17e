#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Game State Cache
//!
//! Redis-backed caching and completion-time task queues for game server
//! domain state.
//!
//! ## Overview
//!
//! The relational database stays the system of record. This crate sits in
//! front of it and gives gameplay code two primitives per domain:
//!
//! - a **field-level cache**: one hash record per user, where each field
//!   (a building, a unit type, a mission attribute) is read and written on
//!   its own
//! - a **completion-time task queue**: one sorted index per user scored by
//!   due time, drained atomically so concurrent workers never resolve the
//!   same upgrade twice
//!
//! ## Module Organization
//!
//! - [`store`] - Store client with timeouts over Redis or an in-process backend
//! - [`cache`] - Field-level hash records ([`cache::CacheManager`])
//! - [`tasks`] - Sorted-set task queue ([`tasks::TaskManager`])
//! - [`domains`] - Building, unit, research, buff, item, mission and resource managers
//! - [`registry`] - Lazy, concurrency-safe manager registry
//! - [`facade`] - [`GameCache`], the entry point
//! - [`config`] - Layered TOML + environment configuration
//! - [`error`] - [`StoreError`] taxonomy
//! - [`keys`] - Key namespacing
//! - [`logging`] - Optional subscriber setup
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use game_state_cache::GameCache;
//!
//! # async fn example() -> Result<(), game_state_cache::StoreError> {
//! let cache = GameCache::in_memory();
//! let buildings = cache.building()?;
//!
//! let start = Utc::now();
//! buildings
//!     .enqueue_upgrade_as_of(42, 7, start + Duration::seconds(10), start)
//!     .await?;
//! let done = buildings
//!     .get_completed_upgrades(42, start + Duration::seconds(11))
//!     .await?;
//! assert_eq!(done, vec![7]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                   # in-process store
//! REDIS_URL=redis://localhost:6379 \
//!   cargo test --features test-services        # adds live Redis tests
//! ```

pub mod cache;
pub mod config;
pub mod domains;
pub mod error;
pub mod facade;
pub mod keys;
pub mod logging;
pub mod registry;
pub mod store;
pub mod tasks;

pub use cache::{CacheManager, TtlPolicy};
pub use config::{ConfigManager, GameCacheConfig};
pub use domains::{DomainContext, DomainManager};
pub use error::{StoreError, StoreResult};
pub use facade::{GameCache, PulledTasks};
pub use keys::{DomainKind, Namespace, StoreKey};
pub use registry::ManagerRegistry;
pub use store::StoreClient;
pub use tasks::{QueueStatus, TaskEntry, TaskManager, TaskSettings, TieBreak};
