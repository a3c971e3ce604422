//! Versioned cache partitions: seeding at install, cleanup at activation.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::manifest::ShellManifest;
use crate::cache::{CacheStore, Partition};
use crate::net::{Fetcher, Request};

/// One version of the application's caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  prefix: String,
  version: String,
}

impl Generation {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      prefix: prefix.to_string(),
      version: version.to_string(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Partition holding the application shell.
  pub fn shell_cache(&self) -> String {
    format!("{}-app-{}", self.prefix, self.version)
  }

  /// Partition holding map tiles.
  pub fn tile_cache(&self) -> String {
    format!("{}-tiles-{}", self.prefix, self.version)
  }

  /// Whether `name` belongs to this generation.
  pub fn owns(&self, name: &str) -> bool {
    name == self.shell_cache() || name == self.tile_cache()
  }
}

/// What install stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub shell_cache: String,
  pub assets: usize,
}

/// What activation removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stale partitions that were deleted
  pub deleted: Vec<String>,
  /// Stale partitions whose deletion failed
  pub failed: Vec<String>,
}

/// Owns the current generation's partitions.
pub struct GenerationManager<S: CacheStore, F: Fetcher> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: Generation,
  manifest: ShellManifest,
}

impl<S: CacheStore, F: Fetcher> GenerationManager<S, F> {
  pub fn new(store: Arc<S>, fetcher: Arc<F>, generation: Generation, manifest: ShellManifest) -> Self {
    Self {
      store,
      fetcher,
      generation,
      manifest,
    }
  }

  pub fn generation(&self) -> &Generation {
    &self.generation
  }

  /// Whether the shell cache of this generation holds every manifest asset.
  ///
  /// A shell partition created by navigation caching alone does not count.
  pub fn is_installed(&self) -> Result<bool> {
    let shell = self.generation.shell_cache();
    if !self.store.partition_names()?.contains(&shell) {
      return Ok(false);
    }

    let keys = self.store.keys(&shell)?;
    Ok(
      self
        .manifest
        .assets()
        .iter()
        .all(|url| keys.contains(&Request::get(url.clone()).cache_key())),
    )
  }

  /// Fetch every shell asset and store them all, or none.
  ///
  /// Fails on the first asset that cannot be fetched or answers with a status
  /// other than 200. Partitions of other generations are never touched.
  pub async fn install(&self) -> Result<InstallReport> {
    // Created by the bulk write, so a failed install leaves no partition behind
    let shell = Partition::handle(&self.store, &self.generation.shell_cache());

    let requests: Vec<Request> = self
      .manifest
      .assets()
      .iter()
      .cloned()
      .map(Request::get)
      .collect();

    let responses = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

    let mut entries = Vec::with_capacity(requests.len());
    for (request, response) in requests.into_iter().zip(responses) {
      let response =
        response.map_err(|e| eyre!("Failed to fetch shell asset {}: {}", request.url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Shell asset {} returned status {}",
          request.url,
          response.status
        ));
      }
      debug!(url = %request.url, bytes = response.body.len(), "Fetched shell asset");
      entries.push((request, response));
    }

    shell.put_all(&entries)?;

    info!(
      cache = shell.name(),
      assets = entries.len(),
      "Installed application shell"
    );

    Ok(InstallReport {
      shell_cache: shell.name().to_string(),
      assets: entries.len(),
    })
  }

  /// Delete every partition that does not belong to the current generation.
  ///
  /// Never fails: a partition that cannot be deleted is reported and skipped.
  pub async fn activate(&self) -> ActivationReport {
    let names = match self.store.partition_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to list cache partitions");
        return ActivationReport::default();
      }
    };

    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| !self.generation.owns(name))
      .collect();

    let results = join_all(stale.into_iter().map(|name| async move {
      let result = self.store.delete_partition(&name);
      (name, result)
    }))
    .await;

    let mut report = ActivationReport::default();
    for (name, result) in results {
      match result {
        Ok(_) => {
          info!(cache = %name, "Deleted stale cache");
          report.deleted.push(name);
        }
        Err(e) => {
          warn!(cache = %name, error = %e, "Failed to delete stale cache");
          report.failed.push(name);
        }
      }
    }

    report
  }
}
