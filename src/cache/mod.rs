//! Durable response cache.
//!
//! This module provides the storage side of the worker:
//! - Named partitions mapping request keys to response snapshots
//! - Insertion-ordered key listing
//! - Atomic bulk insertion for seeding the application shell
//! - A size bound enforced by evicting the oldest entries

mod eviction;
mod storage;
#[cfg(test)]
pub mod testing;
mod traits;

pub use eviction::{EvictionPolicy, EvictionReport};
pub use storage::SqliteStore;
pub use traits::{CacheStore, Partition, PartitionInfo};
