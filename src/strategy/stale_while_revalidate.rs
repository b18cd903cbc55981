use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::oneshot;

use super::{Strategy, StrategyContext, StrategyKind};
use crate::net::{Request, Response};

/// Answer from cache right away and refresh the entry in the background.
///
/// The cache read happens before the revalidation fetch is spawned. On a hit
/// the caller gets the cached copy and the fetch only updates the namespace for
/// later requests; on a miss the caller waits for that same fetch.
pub struct StaleWhileRevalidate {
  ctx: StrategyContext,
}

impl StaleWhileRevalidate {
  pub fn new(ctx: StrategyContext) -> Self {
    Self { ctx }
  }

  /// Spawn the revalidation fetch. The receiver yields its outcome after the
  /// cache write, if any, has landed.
  fn revalidate(&self, request: &Request) -> oneshot::Receiver<Result<Response>> {
    let (tx, rx) = oneshot::channel();
    let ctx = self.ctx.clone();
    let request = request.clone();

    self
      .ctx
      .background
      .spawn(format!("revalidate {}", request.url), async move {
        match ctx.network.fetch(&request).await {
          Ok(response) => {
            let stored = if response.is_success() {
              ctx.cache.store(&request, &response)
            } else {
              Ok(())
            };
            // Ignore send errors - a cache hit already answered the caller
            let _ = tx.send(Ok(response));
            stored
          }
          Err(e) => {
            let reason = e.to_string();
            let _ = tx.send(Err(e));
            Err(eyre!("revalidation failed: {}", reason))
          }
        }
      });

    rx
  }
}

#[async_trait]
impl Strategy for StaleWhileRevalidate {
  fn kind(&self) -> StrategyKind {
    StrategyKind::StaleWhileRevalidate
  }

  async fn execute(&self, request: &Request) -> Result<Response> {
    let cached = self.ctx.cached(request);
    let pending = self.revalidate(request);

    if let Some(cached) = cached {
      return Ok(cached);
    }

    match pending.await {
      Ok(Ok(response)) => Ok(response),
      Ok(Err(e)) => self.ctx.offline_fallback(request, e),
      Err(_) => Err(eyre!("revalidation of {} was dropped", request.url)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::ResponseSource;
  use crate::strategy::test_support::*;
  use crate::testing::{url, MockNetwork};
  use std::time::Duration;

  const PAGE: &str = "https://app.test/notes";

  #[tokio::test]
  async fn test_empty_cache_returns_network_and_populates() {
    let network = MockNetwork::new();
    network.respond(PAGE, 200, "<h1>notes</h1>");
    let ctx = context(network.clone());
    let request = Request::navigate(url(PAGE));

    let response = StaleWhileRevalidate::new(ctx.clone())
      .execute(&request)
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.body, b"<h1>notes</h1>");

    let cached = ctx.cache.lookup(&request).unwrap().unwrap();
    assert_eq!(cached.body, b"<h1>notes</h1>");
  }

  #[tokio::test]
  async fn test_second_call_answers_from_cache_without_waiting() {
    let network = MockNetwork::new();
    network.respond(PAGE, 200, "v1");
    let ctx = context(network.clone());
    let strategy = StaleWhileRevalidate::new(ctx.clone());
    let request = Request::navigate(url(PAGE));

    strategy.execute(&request).await.unwrap();

    network.respond(PAGE, 200, "v2");
    network.set_delay(Duration::from_secs(5));
    let second = tokio::time::timeout(Duration::from_millis(500), strategy.execute(&request))
      .await
      .expect("cached answer should not wait for the network")
      .unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, b"v1");
    assert!(ctx.background.pending() >= 1);
  }

  #[tokio::test]
  async fn test_revalidation_updates_cache_for_later_reads() {
    let network = MockNetwork::new();
    let ctx = context(network.clone());
    let strategy = StaleWhileRevalidate::new(ctx.clone());
    let request = Request::navigate(url(PAGE));
    seed(&ctx, &request, "old");

    network.respond(PAGE, 200, "new");
    let first = strategy.execute(&request).await.unwrap();
    assert_eq!(first.body, b"old");

    ctx.background.wait_until_idle().await;
    let second = strategy.execute(&request).await.unwrap();
    assert_eq!(second.body, b"new");
    assert_eq!(second.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_failed_revalidation_is_reported_on_error_channel_only() {
    let network = MockNetwork::new();
    let ctx = context(network.clone());
    let request = Request::navigate(url(PAGE));
    seed(&ctx, &request, "cached");

    let response = StaleWhileRevalidate::new(ctx.clone())
      .execute(&request)
      .await
      .unwrap();
    assert_eq!(response.body, b"cached");

    ctx.background.wait_until_idle().await;
    let errors = ctx.background.take_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].task.contains(PAGE));
  }

  #[tokio::test]
  async fn test_miss_and_offline_navigation_gets_offline_page() {
    let network = MockNetwork::new();
    let ctx = context(network);
    seed_offline_page(&ctx);

    let response = StaleWhileRevalidate::new(ctx)
      .execute(&Request::navigate(url(PAGE)))
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::OfflineFallback);
    assert_eq!(response.body, b"you are offline");
  }
}
