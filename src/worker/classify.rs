use url::{Origin, Url};

use super::manifest::ShellManifest;
use crate::net::{Request, RequestMode};

/// Which strategy a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Page load: network first, shell cache fallback
  Navigation,
  /// Map tile: stale-while-revalidate with bounded cache
  Tile,
  /// Application shell asset: cache first
  ShellAsset,
  /// Everything else: straight to the network
  Other,
}

impl RequestClass {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Navigation => "navigation",
      Self::Tile => "tile",
      Self::ShellAsset => "shell-asset",
      Self::Other => "other",
    }
  }
}

/// Assigns every request to exactly one [`RequestClass`].
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Origin,
  tile_host: String,
  manifest: ShellManifest,
}

impl Classifier {
  pub fn new(app_base: &Url, tile_host: &str, manifest: ShellManifest) -> Self {
    Self {
      origin: app_base.origin(),
      tile_host: tile_host.trim().to_ascii_lowercase(),
      manifest,
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.mode == RequestMode::Navigate {
      return RequestClass::Navigation;
    }

    if self.is_tile_host(&request.url) {
      return RequestClass::Tile;
    }

    if request.url.origin() == self.origin && self.manifest.contains(&request.url) {
      return RequestClass::ShellAsset;
    }

    RequestClass::Other
  }

  /// Tile servers are usually sharded over subdomains (`a.`, `b.`, `c.`).
  fn is_tile_host(&self, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_ascii_lowercase();

    host == self.tile_host
      || host
        .strip_suffix(self.tile_host.as_str())
        .is_some_and(|prefix| prefix.ends_with('.'))
  }
}
