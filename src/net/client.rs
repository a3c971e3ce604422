use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use url::{Origin, Url};

use super::types::{Request, RequestMode, Response, ResponseKind};
use super::Fetcher;

/// `reqwest`-backed fetcher.
///
/// Responses are labelled the way a browser would see them from the application's
/// origin, so cross-origin `no-cors` requests produce opaque responses.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Origin,
}

impl HttpFetcher {
  pub fn new(app_base: &Url, user_agent: &str, timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(user_agent);
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: app_base.origin(),
    })
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    let response = match response_kind(&self.origin, request) {
      ResponseKind::Opaque => Response::opaque(body.to_vec()),
      kind => Response {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body: body.to_vec(),
        kind,
      },
    };

    Ok(response)
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    self.send(request)
  }
}

/// How a response to `request` looks from `origin`.
fn response_kind(origin: &Origin, request: &Request) -> ResponseKind {
  if request.mode == RequestMode::Navigate || request.url.origin() == *origin {
    ResponseKind::Basic
  } else if request.mode == RequestMode::NoCors {
    ResponseKind::Opaque
  } else {
    ResponseKind::Cors
  }
}
