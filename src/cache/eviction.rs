//! Size bound for the tile cache.
//!
//! Entries are evicted in insertion order, oldest first. Reads do not refresh an
//! entry's position, so this is FIFO and not LRU.

use color_eyre::Result;
use std::num::NonZeroUsize;
use tracing::{info, warn};

use super::traits::{CacheStore, Partition};

/// Outcome of one enforcement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
  /// Entries present before eviction
  pub entries_before: usize,
  /// Entries successfully deleted
  pub evicted: usize,
  /// Deletions that failed and were skipped
  pub failed: usize,
}

/// Maximum entry count for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
  max_entries: NonZeroUsize,
}

impl EvictionPolicy {
  pub fn new(max_entries: NonZeroUsize) -> Self {
    Self { max_entries }
  }

  pub fn max_entries(&self) -> usize {
    self.max_entries.get()
  }

  /// Number of entries that must go for `count` to fit the bound.
  pub fn overflow(&self, count: usize) -> usize {
    count.saturating_sub(self.max_entries.get())
  }

  /// Delete the oldest entries of `partition` until it fits the bound.
  ///
  /// Listing the keys can fail; individual deletions are best-effort and only
  /// counted in the report.
  pub fn enforce<S: CacheStore>(&self, partition: &Partition<S>) -> Result<EvictionReport> {
    let keys = partition.keys()?;
    let overflow = self.overflow(keys.len());

    let mut report = EvictionReport {
      entries_before: keys.len(),
      ..Default::default()
    };

    for key in keys.iter().take(overflow) {
      match partition.delete(key) {
        Ok(_) => report.evicted += 1,
        Err(e) => {
          warn!(partition = partition.name(), key = %key, error = %e, "Failed to evict entry");
          report.failed += 1;
        }
      }
    }

    if overflow > 0 {
      info!(
        partition = partition.name(),
        entries_before = report.entries_before,
        evicted = report.evicted,
        max_entries = self.max_entries(),
        "Evicted oldest entries"
      );
    }

    Ok(report)
  }
}
