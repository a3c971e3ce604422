//! Fetch strategies.
//!
//! Every strategy resolves to a response. Network and store failures are
//! recovered here and never reach the caller; the worst case is a synthetic
//! 504.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::classify::RequestClass;
use super::generation::Generation;
use crate::cache::{CacheStore, EvictionPolicy, Partition};
use crate::net::{Fetcher, Request, Response};

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  Unavailable,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Unavailable => "unavailable",
    }
  }
}

/// A response together with its origin.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  fn cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  fn unavailable() -> Self {
    Self {
      response: Response::gateway_timeout(),
      source: ResponseSource::Unavailable,
    }
  }
}

/// Executes the strategy for a classified request.
pub struct StrategyEngine<S: CacheStore, F: Fetcher> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: Generation,
  eviction: EvictionPolicy,
  /// Tile revalidations still writing to the cache
  background: Mutex<JoinSet<()>>,
}

impl<S: CacheStore, F: Fetcher> StrategyEngine<S, F> {
  pub fn new(store: Arc<S>, fetcher: Arc<F>, generation: Generation, eviction: EvictionPolicy) -> Self {
    Self {
      store,
      fetcher,
      generation,
      eviction,
      background: Mutex::new(JoinSet::new()),
    }
  }

  pub async fn respond(&self, class: RequestClass, request: &Request) -> Served {
    match class {
      RequestClass::Navigation => self.network_first(request).await,
      RequestClass::ShellAsset => self.cache_first(request).await,
      RequestClass::Tile => self.stale_while_revalidate(request).await,
      RequestClass::Other => self.network_only(request).await,
    }
  }

  /// Live response first; a 200 refreshes the shell cache. Falls back to the
  /// shell cache when the network fails or answers with another status, and to
  /// a 504 when the page was never cached.
  pub async fn network_first(&self, request: &Request) -> Served {
    let shell = Partition::handle(&self.store, &self.generation.shell_cache());

    match self.fetcher.fetch(request).await {
      Ok(response) if response.is_ok() => {
        if let Err(e) = shell.put(request, &response) {
          warn!(url = %request.url, error = %e, "Failed to store navigation response");
        }
        Served::network(response)
      }
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "Navigation answered with error status");
        match lookup(&shell, request) {
          Some(cached) => Served::cache(cached),
          None => Served::unavailable(),
        }
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Navigation fetch failed, trying shell cache");
        match lookup(&shell, request) {
          Some(cached) => Served::cache(cached),
          None => Served::unavailable(),
        }
      }
    }
  }

  /// Shell cache first. A miss goes to the network without write-back.
  pub async fn cache_first(&self, request: &Request) -> Served {
    let shell = Partition::handle(&self.store, &self.generation.shell_cache());

    match lookup(&shell, request) {
      Some(cached) => Served::cache(cached),
      None => {
        debug!(url = %request.url, "Shell asset missing from cache");
        self.network_only(request).await
      }
    }
  }

  /// Straight to the network, no caching.
  pub async fn network_only(&self, request: &Request) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => Served::network(response),
      Err(e) => {
        debug!(url = %request.url, error = %e, "Fetch failed");
        Served::unavailable()
      }
    }
  }

  /// Cached tile immediately if there is one, live tile otherwise. The live
  /// fetch always runs and refreshes the tile cache in the background.
  pub async fn stale_while_revalidate(&self, request: &Request) -> Served {
    let tiles = Partition::handle(&self.store, &self.generation.tile_cache());

    let (tx, rx) = oneshot::channel();
    self.spawn_revalidation(tiles.clone(), request.clone(), tx);

    if let Some(cached) = lookup(&tiles, request) {
      return Served::cache(cached);
    }

    match rx.await {
      Ok(response) => Served::network(response),
      Err(_) => Served::unavailable(),
    }
  }

  fn spawn_revalidation(&self, tiles: Partition<S>, request: Request, tx: oneshot::Sender<Response>) {
    let fetcher = Arc::clone(&self.fetcher);
    let eviction = self.eviction;

    let task = async move {
      let response = match fetcher.fetch(&request).await {
        Ok(response) => response,
        Err(e) => {
          // Dropping `tx` tells a waiting caller the tile is unavailable
          debug!(url = %request.url, error = %e, "Tile fetch failed");
          return;
        }
      };

      if !response.is_storable() {
        let _ = tx.send(response);
        return;
      }

      // The caller may have been served from cache already; a closed channel is fine
      let _ = tx.send(response.clone());

      if let Err(e) = store_tile(&tiles, &request, &response, eviction) {
        warn!(url = %request.url, error = %e, "Failed to update tile cache");
      }
    };

    let mut background = self
      .background
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    // Reap finished revalidations so the set does not grow without bound
    while background.try_join_next().is_some() {}
    background.spawn(task);
  }

  /// Wait for all background tile revalidations to finish.
  pub async fn drain(&self) {
    let mut pending = {
      let mut background = self
        .background
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      std::mem::take(&mut *background)
    };

    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Tile revalidation task failed");
      }
    }
  }
}

/// Write a tile and bring the tile cache back under its bound.
fn store_tile<S: CacheStore>(
  tiles: &Partition<S>,
  request: &Request,
  response: &Response,
  eviction: EvictionPolicy,
) -> Result<()> {
  tiles.put(request, response)?;
  eviction.enforce(tiles)?;
  Ok(())
}

/// Cache lookup where a store failure counts as a miss.
fn lookup<S: CacheStore>(partition: &Partition<S>, request: &Request) -> Option<Response> {
  match partition.match_request(request) {
    Ok(found) => found,
    Err(e) => {
      warn!(cache = partition.name(), url = %request.url, error = %e, "Cache lookup failed");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::FlakyStore;
  use crate::cache::SqliteStore;
  use crate::net::testing::ScriptedFetcher;
  use crate::net::ResponseKind;
  use std::num::NonZeroUsize;
  use std::time::{Duration, Instant};

  const PAGE: &str = "https://maps.example.org/app/";
  const ASSET: &str = "https://maps.example.org/app/leaflet.js";
  const API: &str = "https://maps.example.org/app/api/routes.json";

  fn tile_url(n: usize) -> String {
    format!("https://a.tile.openstreetmap.org/12/{}/1500.png", n)
  }

  struct Fixture {
    store: Arc<SqliteStore>,
    fetcher: Arc<ScriptedFetcher>,
    engine: StrategyEngine<SqliteStore, ScriptedFetcher>,
  }

  impl Fixture {
    fn new(max_tiles: usize) -> Self {
      let store = Arc::new(SqliteStore::open_in_memory().unwrap());
      let fetcher = Arc::new(ScriptedFetcher::new());
      let engine = StrategyEngine::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        Generation::new("route-aid", "v6"),
        EvictionPolicy::new(NonZeroUsize::new(max_tiles).unwrap()),
      );
      Self {
        store,
        fetcher,
        engine,
      }
    }

    fn shell(&self) -> Partition<SqliteStore> {
      Partition::handle(&self.store, "route-aid-app-v6")
    }

    fn tiles(&self) -> Partition<SqliteStore> {
      Partition::handle(&self.store, "route-aid-tiles-v6")
    }
  }

  fn request(url: &str) -> Request {
    Request::parse(url).unwrap()
  }

  fn navigate(url: &str) -> Request {
    Request::navigate(url::Url::parse(url).unwrap())
  }

  #[tokio::test]
  async fn test_navigation_online_updates_shell() {
    let fx = Fixture::new(10);
    fx.fetcher.respond(PAGE, Response::new(200, "fresh"));

    let served = fx.engine.network_first(&navigate(PAGE)).await;

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"fresh".to_vec());
    let cached = fx.shell().match_request(&navigate(PAGE)).unwrap();
    assert_eq!(cached.map(|r| r.body), Some(b"fresh".to_vec()));
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_page() {
    let fx = Fixture::new(10);
    fx.shell().put(&navigate(PAGE), &Response::new(200, "cached")).unwrap();
    fx.fetcher.fail(PAGE);

    let served = fx.engine.network_first(&navigate(PAGE)).await;

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"cached".to_vec());
  }

  #[tokio::test]
  async fn test_navigation_offline_without_cache_is_504() {
    let fx = Fixture::new(10);
    fx.fetcher.fail(PAGE);

    let served = fx.engine.network_first(&navigate(PAGE)).await;

    assert_eq!(served.source, ResponseSource::Unavailable);
    assert_eq!(served.response.status, 504);
    assert!(served.response.body.is_empty());
  }

  #[tokio::test]
  async fn test_navigation_error_status_prefers_cache() {
    let fx = Fixture::new(10);
    fx.shell().put(&navigate(PAGE), &Response::new(200, "cached")).unwrap();
    fx.fetcher.respond(PAGE, Response::new(503, "down"));

    let served = fx.engine.network_first(&navigate(PAGE)).await;

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"cached".to_vec());
  }

  #[tokio::test]
  async fn test_navigation_error_status_without_cache_is_504() {
    let fx = Fixture::new(10);
    fx.fetcher.respond(PAGE, Response::new(503, "upstream down"));

    let served = fx.engine.network_first(&navigate(PAGE)).await;

    assert_eq!(served.source, ResponseSource::Unavailable);
    assert_eq!(served.response.status, 504);
    assert!(served.response.body.is_empty());
    assert!(fx.shell().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_shell_asset_hit_skips_network() {
    let fx = Fixture::new(10);
    let stored = Response::new(200, "L.map()").with_header("Content-Type", "text/javascript");
    fx.shell().put(&request(ASSET), &stored).unwrap();
    fx.fetcher.respond(ASSET, Response::new(200, "newer"));

    let served = fx.engine.cache_first(&request(ASSET)).await;

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response, stored);
    assert!(fx.fetcher.calls().is_empty());
  }

  #[tokio::test]
  async fn test_shell_asset_miss_has_no_write_back() {
    let fx = Fixture::new(10);
    fx.fetcher.respond(ASSET, Response::new(200, "L.map()"));

    let served = fx.engine.cache_first(&request(ASSET)).await;

    assert_eq!(served.source, ResponseSource::Network);
    assert!(fx.shell().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_other_goes_to_network_uncached() {
    let fx = Fixture::new(10);
    fx.shell().put(&request(API), &Response::new(200, "stale")).unwrap();
    fx.fetcher.respond(API, Response::new(200, "live"));

    let served = fx.engine.respond(RequestClass::Other, &request(API)).await;

    assert_eq!(served.response.body, b"live".to_vec());
    assert_eq!(fx.fetcher.calls_to(API), 1);
  }

  #[tokio::test]
  async fn test_other_offline_is_504() {
    let fx = Fixture::new(10);
    let served = fx.engine.network_only(&request(API)).await;
    assert_eq!(served.response.status, 504);
  }

  #[tokio::test]
  async fn test_tile_hit_does_not_wait_for_network() {
    let fx = Fixture::new(10);
    let tile = request(&tile_url(1));
    fx.tiles().put(&tile, &Response::new(200, "old tile")).unwrap();
    fx.fetcher
      .respond_after(&tile_url(1), Duration::from_secs(2), Response::new(200, "new tile"));

    let started = Instant::now();
    let served = fx.engine.stale_while_revalidate(&tile).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"old tile".to_vec());
  }

  #[tokio::test]
  async fn test_tile_hit_is_revalidated_in_background() {
    let fx = Fixture::new(10);
    let tile = request(&tile_url(1));
    fx.tiles().put(&tile, &Response::new(200, "old tile")).unwrap();
    fx.fetcher.respond(&tile_url(1), Response::new(200, "new tile"));

    fx.engine.stale_while_revalidate(&tile).await;
    fx.engine.drain().await;

    assert_eq!(fx.fetcher.calls_to(&tile_url(1)), 1);
    let cached = fx.tiles().match_request(&tile).unwrap();
    assert_eq!(cached.map(|r| r.body), Some(b"new tile".to_vec()));
  }

  #[tokio::test]
  async fn test_tile_miss_waits_for_network() {
    let fx = Fixture::new(10);
    let tile = request(&tile_url(2));
    fx.fetcher.respond(&tile_url(2), Response::opaque(b"png".to_vec()));

    let served = fx.engine.stale_while_revalidate(&tile).await;
    fx.engine.drain().await;

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.kind, ResponseKind::Opaque);
    assert!(fx.tiles().match_request(&tile).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_tile_miss_offline_is_504() {
    let fx = Fixture::new(10);
    fx.fetcher.fail(&tile_url(3));

    let served = fx.engine.stale_while_revalidate(&request(&tile_url(3))).await;

    assert_eq!(served.source, ResponseSource::Unavailable);
    assert_eq!(served.response.status, 504);
  }

  #[tokio::test]
  async fn test_tile_error_status_is_returned_but_not_cached() {
    let fx = Fixture::new(10);
    let tile = request(&tile_url(4));
    fx.fetcher.respond(&tile_url(4), Response::new(404, "no tile"));

    let served = fx.engine.stale_while_revalidate(&tile).await;
    fx.engine.drain().await;

    assert_eq!(served.response.status, 404);
    assert!(fx.tiles().keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_tile_write_survives_failed_eviction() {
    let store = Arc::new(FlakyStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new());
    let engine = StrategyEngine::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      Generation::new("route-aid", "v6"),
      EvictionPolicy::new(NonZeroUsize::new(1).unwrap()),
    );
    let tiles = Partition::handle(&store, "route-aid-tiles-v6");
    tiles.put(&request(&tile_url(0)), &Response::new(200, "old")).unwrap();
    store.break_key(request(&tile_url(0)).cache_key());
    fetcher.respond(&tile_url(1), Response::new(200, "new"));

    let served = engine.stale_while_revalidate(&request(&tile_url(1))).await;
    engine.drain().await;

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"new".to_vec());
    // The stuck entry stays over the bound, the new tile is still stored
    let expected = vec![
      request(&tile_url(0)).cache_key(),
      request(&tile_url(1)).cache_key(),
    ];
    assert_eq!(tiles.keys().unwrap(), expected);
  }

  #[tokio::test]
  async fn test_tile_cache_stays_within_bound() {
    let fx = Fixture::new(3);
    for n in 0..8 {
      fx.fetcher.respond(&tile_url(n), Response::new(200, format!("tile {}", n)));
    }

    for n in 0..8 {
      fx.engine.stale_while_revalidate(&request(&tile_url(n))).await;
      fx.engine.drain().await;
      assert!(fx.tiles().keys().unwrap().len() <= 3);
    }

    let expected: Vec<_> = (5..8).map(|n| request(&tile_url(n)).cache_key()).collect();
    assert_eq!(fx.tiles().keys().unwrap(), expected);
  }

  #[tokio::test]
  async fn test_tile_refresh_moves_entry_to_newest() {
    let fx = Fixture::new(2);
    for n in 0..3 {
      fx.fetcher.respond(&tile_url(n), Response::new(200, "t"));
    }

    fx.engine.stale_while_revalidate(&request(&tile_url(0))).await;
    fx.engine.drain().await;
    fx.engine.stale_while_revalidate(&request(&tile_url(1))).await;
    fx.engine.drain().await;
    // Revalidating tile 0 re-inserts it, so tile 1 is now the oldest
    fx.engine.stale_while_revalidate(&request(&tile_url(0))).await;
    fx.engine.drain().await;
    fx.engine.stale_while_revalidate(&request(&tile_url(2))).await;
    fx.engine.drain().await;

    let expected: Vec<_> = [0, 2].iter().map(|n| request(&tile_url(*n)).cache_key()).collect();
    assert_eq!(fx.tiles().keys().unwrap(), expected);
  }

  #[tokio::test]
  async fn test_tiles_go_to_tile_partition_only() {
    let fx = Fixture::new(10);
    fx.fetcher.respond(&tile_url(9), Response::new(200, "t"));

    fx.engine.respond(RequestClass::Tile, &request(&tile_url(9))).await;
    fx.engine.drain().await;

    assert!(fx.shell().keys().unwrap().is_empty());
    assert_eq!(fx.tiles().keys().unwrap().len(), 1);
  }
}
