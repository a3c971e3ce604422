//! Request and response snapshots exchanged between the worker, the store and the network.

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use url::Url;

/// How the client issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RequestMode {
  /// Top-level page navigation
  Navigate,
  /// Cross-origin request with readable response
  Cors,
  /// Cross-origin request whose response is opaque to the client
  NoCors,
  /// Request restricted to the application's own origin
  #[default]
  SameOrigin,
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
}

impl Request {
  /// Create a GET request in the default mode.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::default(),
    }
  }

  /// Create a navigation request for a page.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_mode(RequestMode::Navigate)
  }

  /// Parse a URL string into a GET request.
  pub fn parse(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL '{}': {}", url, e))?;
    Ok(Self::get(url))
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  /// Canonical identity of this request inside a cache partition.
  ///
  /// Fragments never reach the server, so they are not part of the identity.
  pub fn cache_key(&self) -> CacheKey {
    let mut url = self.url.clone();
    url.set_fragment(None);
    CacheKey(format!("{} {}", self.method.to_ascii_uppercase(), url))
  }
}

/// Key of a cache entry: `METHOD URL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<String> for CacheKey {
  fn from(value: String) -> Self {
    Self(value)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Visibility of a response to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response the client may read
  Cors,
  /// Cross-origin `no-cors` response: status and headers hidden, body replayable
  Opaque,
  /// Response synthesised locally
  Synthetic,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Synthetic => "synthetic",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "synthetic" => Ok(Self::Synthetic),
      other => Err(eyre!("Unknown response kind '{}'", other)),
    }
  }
}

/// A response snapshot. Bodies are fully buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: String::new(),
      headers: Vec::new(),
      body: body.into(),
      kind: ResponseKind::Basic,
    }
  }

  /// An opaque response. Status reads as 0 like in a browser.
  pub fn opaque(body: impl Into<Vec<u8>>) -> Self {
    Self {
      kind: ResponseKind::Opaque,
      ..Self::new(0, body)
    }
  }

  /// Returned when neither the cache nor the network can answer.
  pub fn gateway_timeout() -> Self {
    Self {
      status: 504,
      status_text: "Gateway Timeout".to_string(),
      headers: Vec::new(),
      body: Vec::new(),
      kind: ResponseKind::Synthetic,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Status 200 exactly; partial and redirect responses do not count.
  pub fn is_ok(&self) -> bool {
    self.status == 200
  }

  pub fn is_opaque(&self) -> bool {
    self.kind == ResponseKind::Opaque
  }

  /// Whether a tile response may be written to the tile cache.
  pub fn is_storable(&self) -> bool {
    self.is_ok() || self.is_opaque()
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
