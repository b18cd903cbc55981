use async_trait::async_trait;
use color_eyre::Result;
use tracing::debug;

use super::{Strategy, StrategyContext, StrategyKind};
use crate::error::is_network_failure;
use crate::net::{Request, Response};

/// Prefer the live network; fall back to the cache when it is unreachable.
pub struct NetworkFirst {
  ctx: StrategyContext,
}

impl NetworkFirst {
  pub fn new(ctx: StrategyContext) -> Self {
    Self { ctx }
  }
}

#[async_trait]
impl Strategy for NetworkFirst {
  fn kind(&self) -> StrategyKind {
    StrategyKind::NetworkFirst
  }

  async fn execute(&self, request: &Request) -> Result<Response> {
    match self.ctx.network.fetch(request).await {
      Ok(response) => {
        self.ctx.write_through(request, &response);
        Ok(response)
      }
      Err(e) if is_network_failure(&e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        match self.ctx.cached(request) {
          Some(cached) => Ok(cached),
          None => self.ctx.offline_fallback(request, e),
        }
      }
      Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::OfflineError;
  use crate::net::ResponseSource;
  use crate::strategy::test_support::*;
  use crate::testing::{url, MockNetwork};

  const API: &str = "https://app.test/rest/v1/books?select=*";

  #[tokio::test]
  async fn test_success_returns_live_response_and_updates_cache() {
    let network = MockNetwork::new();
    network.respond(API, 200, "[{\"id\":2}]");
    let ctx = context(network.clone());
    let request = Request::get(url(API));
    seed(&ctx, &request, "[{\"id\":1}]");

    let response = NetworkFirst::new(ctx.clone())
      .execute(&request)
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.body, b"[{\"id\":2}]");

    let cached = ctx.cache.lookup(&request).unwrap().unwrap();
    assert_eq!(cached.status, response.status);
    assert_eq!(cached.body, response.body);
    assert_eq!(network.calls(), 1);
  }

  #[tokio::test]
  async fn test_network_failure_returns_cached_entry_unchanged() {
    let network = MockNetwork::new();
    network.fail(API);
    let ctx = context(network);
    let request = Request::get(url(API));
    ctx
      .cache
      .store(
        &request,
        &Response::new(200, "[]").with_header("content-type", "application/json"),
      )
      .unwrap();

    let response = NetworkFirst::new(ctx).execute(&request).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"[]");
    assert_eq!(
      response.headers.get("content-type").map(String::as_str),
      Some("application/json")
    );
  }

  #[tokio::test]
  async fn test_failure_without_cache_propagates_for_api_calls() {
    let network = MockNetwork::new();
    let ctx = context(network);
    seed_offline_page(&ctx);

    let err = NetworkFirst::new(ctx)
      .execute(&Request::get(url(API)))
      .await
      .unwrap_err();
    assert!(matches!(
      offline_kind(&err),
      Some(OfflineError::NetworkUnavailable { .. })
    ));
  }

  #[tokio::test]
  async fn test_navigation_without_cache_gets_offline_page() {
    let network = MockNetwork::new();
    let ctx = context(network);
    seed_offline_page(&ctx);

    let response = NetworkFirst::new(ctx)
      .execute(&Request::navigate(url("https://app.test/songs")))
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::OfflineFallback);
  }

  #[tokio::test]
  async fn test_navigation_without_offline_page_is_generic_failure() {
    let network = MockNetwork::new();
    let ctx = context(network);

    let err = NetworkFirst::new(ctx)
      .execute(&Request::navigate(url("https://app.test/songs")))
      .await
      .unwrap_err();
    assert!(matches!(
      offline_kind(&err),
      Some(OfflineError::OfflineUnavailable { .. })
    ));
  }
}
