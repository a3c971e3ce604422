//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;

use crate::net::{CacheKey, Request, Response};

/// Durable store of named partitions, each an insertion-ordered map from
/// request key to response snapshot.
///
/// Every method is atomic on its own. Sequences of calls are not.
pub trait CacheStore: Send + Sync + 'static {
  /// Create the partition if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Look up a stored response.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<Response>>;

  /// Store a response, replacing any previous entry for the key.
  ///
  /// A replaced entry moves to the end of the insertion order.
  /// Creates the partition when missing.
  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store all entries or none of them.
  fn put_all(&self, partition: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Remove an entry. Returns whether it existed.
  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool>;

  /// Keys of a partition, oldest insertion first.
  fn keys(&self, partition: &str) -> Result<Vec<CacheKey>>;

  /// Names of all partitions.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Remove a partition and its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Summary of every partition.
  fn partition_info(&self) -> Result<Vec<PartitionInfo>>;
}

/// Summary of a partition.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
  pub name: String,
  pub entries: usize,
  pub created_at: DateTime<Utc>,
}

/// Handle to one named partition of a store.
pub struct Partition<S: CacheStore> {
  store: Arc<S>,
  name: String,
}

impl<S: CacheStore> Partition<S> {
  /// Open a partition, creating it if necessary.
  pub fn open(store: &Arc<S>, name: &str) -> Result<Self> {
    store.open(name)?;
    Ok(Self::handle(store, name))
  }

  /// Refer to a partition without creating it. Reads on a missing partition
  /// behave like reads on an empty one.
  pub fn handle(store: &Arc<S>, name: &str) -> Self {
    Self {
      store: Arc::clone(store),
      name: name.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    self.store.get(&self.name, &request.cache_key())
  }

  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self.store.put(&self.name, &request.cache_key(), response)
  }

  pub fn put_all(&self, entries: &[(Request, Response)]) -> Result<()> {
    let entries: Vec<(CacheKey, Response)> = entries
      .iter()
      .map(|(request, response)| (request.cache_key(), response.clone()))
      .collect();
    self.store.put_all(&self.name, &entries)
  }

  pub fn delete(&self, key: &CacheKey) -> Result<bool> {
    self.store.delete(&self.name, key)
  }

  pub fn keys(&self) -> Result<Vec<CacheKey>> {
    self.store.keys(&self.name)
  }
}

impl<S: CacheStore> Clone for Partition<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      name: self.name.clone(),
    }
  }
}
