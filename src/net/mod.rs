//! Network access for the worker.
//!
//! The worker never talks to `reqwest` directly. It goes through [`Fetcher`], so
//! strategies can be exercised against a scripted network in tests.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

use color_eyre::Result;
use std::future::Future;

pub use client::HttpFetcher;
pub use types::{CacheKey, Request, RequestMode, Response, ResponseKind};

/// The network-fetch primitive.
///
/// An `Err` means the network could not be reached at all. Any HTTP answer,
/// including error statuses, comes back as `Ok`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}
