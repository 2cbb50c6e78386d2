//! Adapters for the domain ports.

pub mod clock;
pub mod in_memory;
pub mod lock;
pub mod manual_processor;
pub mod queue;
#[cfg(feature = "lock-redis")]
pub mod redis_lock;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod storage;
pub mod text_renderer;
