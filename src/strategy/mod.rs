//! Caching strategies.
//!
//! Each strategy resolves a request between the current cache namespace and the
//! network. They share one contract, [`Strategy::execute`], and are picked by the
//! dispatcher through [`StrategyKind`].

mod cache_first;
mod network_first;
mod stale_while_revalidate;

use async_trait::async_trait;
use color_eyre::{Report, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::Namespace;
use crate::error::{is_network_failure, OfflineError};
use crate::net::{Method, Network, Request, Response, ResponseSource};
use crate::worker::Background;

pub use cache_first::CacheFirst;
pub use network_first::NetworkFirst;
pub use stale_while_revalidate::StaleWhileRevalidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl StrategyKind {
  pub fn build(self, ctx: StrategyContext) -> Box<dyn Strategy> {
    match self {
      Self::CacheFirst => Box::new(CacheFirst::new(ctx)),
      Self::NetworkFirst => Box::new(NetworkFirst::new(ctx)),
      Self::StaleWhileRevalidate => Box::new(StaleWhileRevalidate::new(ctx)),
    }
  }
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::CacheFirst => write!(f, "cache-first"),
      Self::NetworkFirst => write!(f, "network-first"),
      Self::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
    }
  }
}

#[async_trait]
pub trait Strategy: Send + Sync {
  fn kind(&self) -> StrategyKind;

  /// Resolve the request to exactly one response, or fail once every fallback
  /// is exhausted.
  async fn execute(&self, request: &Request) -> Result<Response>;
}

/// Everything a strategy needs: the network, the current namespace, the offline
/// page location and the registry for detached work.
#[derive(Clone)]
pub struct StrategyContext {
  pub network: Arc<dyn Network>,
  pub cache: Namespace,
  pub offline_page: Url,
  pub background: Arc<Background>,
}

impl StrategyContext {
  /// Cache lookup that treats storage errors as a miss.
  fn cached(&self, request: &Request) -> Option<Response> {
    match self.cache.lookup(request) {
      Ok(hit) => {
        debug!(url = %request.url, hit = hit.is_some(), "cache lookup");
        hit
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Store a successful network response. Failure to store does not fail the
  /// request.
  fn write_through(&self, request: &Request, response: &Response) {
    if !response.is_success() {
      debug!(url = %request.url, status = response.status, "not caching unsuccessful response");
      return;
    }
    if let Err(e) = self.cache.store(request, response) {
      warn!(url = %request.url, error = %e, "cache write failed");
    }
  }

  /// Last resort once network and cache are exhausted: navigations get the
  /// offline page, everything else gets the original failure.
  fn offline_fallback(&self, request: &Request, cause: Report) -> Result<Response> {
    if !request.is_navigation() || !is_network_failure(&cause) {
      return Err(cause);
    }

    match self.cache.lookup_url(&Method::GET, &self.offline_page) {
      Ok(Some(page)) => {
        debug!(url = %request.url, "serving offline page");
        Ok(page.with_source(ResponseSource::OfflineFallback))
      }
      Ok(None) => Err(
        OfflineError::OfflineUnavailable {
          url: request.url.to_string(),
        }
        .into(),
      ),
      Err(e) => {
        warn!(error = %e, "offline page lookup failed");
        Err(
          OfflineError::OfflineUnavailable {
            url: request.url.to_string(),
          }
          .into(),
        )
      }
    }
  }
}
