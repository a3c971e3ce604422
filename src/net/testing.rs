//! Scripted network for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use super::types::{Request, Response};
use super::Fetcher;

#[derive(Clone)]
enum Route {
  Respond(Response),
  Delayed(Duration, Response),
  Fail,
}

/// Fetcher answering from a fixed table of URLs and recording every call.
///
/// Unknown URLs fail like an unreachable network.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self.set(url, Route::Respond(response));
  }

  pub fn respond_after(&self, url: &str, delay: Duration, response: Response) {
    self.set(url, Route::Delayed(delay, response));
  }

  pub fn fail(&self, url: &str) {
    self.set(url, Route::Fail);
  }

  /// URLs fetched so far, in call order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self.calls().iter().filter(|c| c.as_str() == url).count()
  }

  fn set(&self, url: &str, route: Route) {
    self.routes.lock().unwrap().insert(url.to_string(), route);
  }
}

impl Fetcher for ScriptedFetcher {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());
    let route = self.routes.lock().unwrap().get(&url).cloned();

    async move {
      match route {
        Some(Route::Respond(response)) => Ok(response),
        Some(Route::Delayed(delay, response)) => {
          tokio::time::sleep(delay).await;
          Ok(response)
        }
        Some(Route::Fail) | None => Err(eyre!("Network unreachable: {}", url)),
      }
    }
  }
}
