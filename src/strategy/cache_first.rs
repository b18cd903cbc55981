use async_trait::async_trait;
use color_eyre::Result;
use tracing::debug;

use super::{Strategy, StrategyContext, StrategyKind};
use crate::net::{Request, Response};

/// Serve from cache; go to the network only on a miss.
///
/// 1. Cache hit - return immediately, no network call
/// 2. Miss - fetch, write through, return
/// 3. Fetch failed - offline page for navigations, otherwise the failure
pub struct CacheFirst {
  ctx: StrategyContext,
}

impl CacheFirst {
  pub fn new(ctx: StrategyContext) -> Self {
    Self { ctx }
  }
}

#[async_trait]
impl Strategy for CacheFirst {
  fn kind(&self) -> StrategyKind {
    StrategyKind::CacheFirst
  }

  async fn execute(&self, request: &Request) -> Result<Response> {
    if let Some(cached) = self.ctx.cached(request) {
      return Ok(cached);
    }

    match self.ctx.network.fetch(request).await {
      Ok(response) => {
        self.ctx.write_through(request, &response);
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache-first miss and network failed");
        self.ctx.offline_fallback(request, e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::OfflineError;
  use crate::net::{Destination, ResponseSource};
  use crate::strategy::test_support::*;
  use crate::testing::{url, MockNetwork};

  const STYLE: &str = "https://app.test/styles/main.css";

  #[tokio::test]
  async fn test_hit_never_touches_network() {
    let network = MockNetwork::new();
    network.respond(STYLE, 200, "fresh");
    let ctx = context(network.clone());
    let request = Request::get(url(STYLE)).with_destination(Destination::Style);
    seed(&ctx, &request, "cached");

    let strategy = CacheFirst::new(ctx);
    for _ in 0..3 {
      let response = strategy.execute(&request).await.unwrap();
      assert_eq!(response.body, b"cached");
      assert_eq!(response.source, ResponseSource::Cache);
    }
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_miss_fetches_and_writes_through() {
    let network = MockNetwork::new();
    network.respond(STYLE, 200, "body{}");
    let ctx = context(network.clone());
    let strategy = CacheFirst::new(ctx.clone());
    let request = Request::get(url(STYLE));

    let first = strategy.execute(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(first.body, b"body{}");

    let second = strategy.execute(&request).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, b"body{}");
    assert_eq!(network.calls(), 1);
  }

  #[tokio::test]
  async fn test_error_status_is_returned_but_not_cached() {
    let network = MockNetwork::new();
    network.respond(STYLE, 404, "missing");
    let ctx = context(network.clone());
    let strategy = CacheFirst::new(ctx.clone());
    let request = Request::get(url(STYLE));

    let response = strategy.execute(&request).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(ctx.cache.lookup(&request).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_subresource_failure_propagates() {
    let network = MockNetwork::new();
    let ctx = context(network);
    seed_offline_page(&ctx);
    let strategy = CacheFirst::new(ctx);

    let err = strategy
      .execute(&Request::get(url(STYLE)))
      .await
      .unwrap_err();
    assert!(matches!(
      offline_kind(&err),
      Some(OfflineError::NetworkUnavailable { .. })
    ));
  }

  #[tokio::test]
  async fn test_navigation_failure_serves_offline_page() {
    let network = MockNetwork::new();
    let ctx = context(network);
    seed_offline_page(&ctx);
    let strategy = CacheFirst::new(ctx);

    let response = strategy
      .execute(&Request::navigate(url("https://app.test/books")))
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::OfflineFallback);
    assert_eq!(response.body, b"you are offline");
  }
}
