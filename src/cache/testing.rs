//! Store wrapper with injectable delete failures for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::Mutex;

use super::storage::SqliteStore;
use super::traits::{CacheStore, PartitionInfo};
use crate::net::{CacheKey, Response};

/// In-memory SQLite store whose deletions fail for chosen keys and partitions.
///
/// Everything else passes through unchanged.
pub struct FlakyStore {
  inner: SqliteStore,
  broken_keys: Mutex<HashSet<CacheKey>>,
  broken_partitions: Mutex<HashSet<String>>,
}

impl FlakyStore {
  pub fn new() -> Self {
    Self {
      inner: SqliteStore::open_in_memory().unwrap(),
      broken_keys: Mutex::new(HashSet::new()),
      broken_partitions: Mutex::new(HashSet::new()),
    }
  }

  /// Make `delete` of this key fail in every partition.
  pub fn break_key(&self, key: CacheKey) {
    self.broken_keys.lock().unwrap().insert(key);
  }

  /// Make `delete_partition` of this name fail.
  pub fn break_partition(&self, name: &str) {
    self.broken_partitions.lock().unwrap().insert(name.to_string());
  }
}

impl CacheStore for FlakyStore {
  fn open(&self, name: &str) -> Result<()> {
    CacheStore::open(&self.inner, name)
  }

  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<Response>> {
    self.inner.get(partition, key)
  }

  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()> {
    self.inner.put(partition, key, response)
  }

  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    self.inner.put_all(partition, entries)
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    if self.broken_keys.lock().unwrap().contains(key) {
      return Err(eyre!("disk I/O error deleting {} from {}", key, partition));
    }
    self.inner.delete(partition, key)
  }

  fn keys(&self, partition: &str) -> Result<Vec<CacheKey>> {
    self.inner.keys(partition)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    self.inner.partition_names()
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    if self.broken_partitions.lock().unwrap().contains(name) {
      return Err(eyre!("disk I/O error deleting partition {}", name));
    }
    self.inner.delete_partition(name)
  }

  fn partition_info(&self) -> Result<Vec<PartitionInfo>> {
    self.inner.partition_info()
  }
}
