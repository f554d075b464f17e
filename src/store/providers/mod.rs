//! Store provider implementations

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStoreService;
pub use self::redis::RedisStoreService;
