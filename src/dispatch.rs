//! Request interception: classify every request and route it to a strategy or
//! straight to the network.

use color_eyre::{eyre::eyre, Report, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, RoutingConfig};
use crate::error::is_network_failure;
use crate::net::{Method, Network, Request, Response, ResponseSource};
use crate::queue::{QueueItem, QueueStorage};
use crate::strategy::{Strategy, StrategyContext, StrategyKind};

/// Header carrying the id of a mutation that was queued instead of sent.
pub const QUEUED_ID_HEADER: &str = "x-queued-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not cacheable: straight to the network, with queue fallback
  Network,
  Strategy(StrategyKind),
}

impl fmt::Display for Route {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Network => write!(f, "network"),
      Self::Strategy(kind) => write!(f, "{}", kind),
    }
  }
}

/// Classification rules, evaluated in order, first match wins.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefixes: Vec<String>,
  asset_extensions: BTreeSet<String>,
}

impl Classifier {
  pub fn new(routing: &RoutingConfig) -> Self {
    Self {
      api_prefixes: routing.api_prefixes.clone(),
      asset_extensions: routing.asset_extensions.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> Route {
    if request.method != Method::GET {
      return Route::Network;
    }
    if self.is_api_call(&request.url) {
      return Route::Strategy(StrategyKind::NetworkFirst);
    }
    if request.destination.is_static_asset() || self.has_asset_extension(&request.url) {
      return Route::Strategy(StrategyKind::CacheFirst);
    }
    if request.is_navigation() {
      return Route::Strategy(StrategyKind::StaleWhileRevalidate);
    }
    Route::Strategy(StrategyKind::NetworkFirst)
  }

  fn is_api_call(&self, url: &Url) -> bool {
    let path = url.path();
    self.api_prefixes.iter().any(|p| path.starts_with(p.as_str()))
  }

  fn has_asset_extension(&self, url: &Url) -> bool {
    url
      .path_segments()
      .and_then(|mut segments| segments.next_back())
      .and_then(|segment| segment.rsplit_once('.'))
      .is_some_and(|(_, ext)| self.asset_extensions.contains(&ext.to_lowercase()))
  }
}

/// Central control point for outbound requests.
pub struct Dispatcher {
  classifier: Classifier,
  network: Arc<dyn Network>,
  strategies: Vec<Box<dyn Strategy>>,
  queue: Arc<dyn QueueStorage>,
  queue_endpoint: Url,
}

impl Dispatcher {
  pub fn new(config: &Config, ctx: StrategyContext, queue: Arc<dyn QueueStorage>) -> Result<Self> {
    Ok(Self {
      classifier: Classifier::new(&config.routing),
      network: Arc::clone(&ctx.network),
      strategies: [
        StrategyKind::CacheFirst,
        StrategyKind::NetworkFirst,
        StrategyKind::StaleWhileRevalidate,
      ]
      .into_iter()
      .map(|kind| kind.build(ctx.clone()))
      .collect(),
      queue,
      queue_endpoint: strip_query(config.resolve(&config.queue.endpoint)?),
    })
  }

  pub fn classify(&self, request: &Request) -> Route {
    self.classifier.classify(request)
  }

  pub async fn dispatch(&self, request: &Request) -> Result<Response> {
    let route = self.classify(request);
    debug!(method = %request.method, url = %request.url, route = %route, "dispatch");

    match route {
      Route::Network => self.pass_through(request).await,
      Route::Strategy(kind) => self.strategy(kind)?.execute(request).await,
    }
  }

  fn strategy(&self, kind: StrategyKind) -> Result<&dyn Strategy> {
    self
      .strategies
      .iter()
      .find(|s| s.kind() == kind)
      .map(|s| s.as_ref())
      .ok_or_else(|| eyre!("No strategy registered for {}", kind))
  }

  async fn pass_through(&self, request: &Request) -> Result<Response> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) if is_network_failure(&e) && self.is_queueable(request) => self.enqueue(request, e),
      Err(e) => Err(e),
    }
  }

  fn is_queueable(&self, request: &Request) -> bool {
    !request.method.is_safe() && strip_query(request.url.clone()) == self.queue_endpoint
  }

  /// Store a failed mutation for later replay and acknowledge it with 202.
  /// Bodies that are not JSON cannot be replayed, so the original failure is
  /// returned instead.
  fn enqueue(&self, request: &Request, cause: Report) -> Result<Response> {
    let payload = match request
      .body
      .as_deref()
      .map(serde_json::from_slice::<serde_json::Value>)
    {
      Some(Ok(payload)) => payload,
      Some(Err(e)) => {
        warn!(url = %request.url, error = %e, "not queueing mutation with non-JSON body");
        return Err(cause);
      }
      None => {
        warn!(url = %request.url, "not queueing mutation without a body");
        return Err(cause);
      }
    };

    let item = QueueItem::new(payload, request.bearer_token().unwrap_or_default());
    self.queue.push(&item)?;
    info!(id = %item.id, url = %request.url, "queued mutation for replay");

    Ok(
      Response::new(202, "")
        .with_header(QUEUED_ID_HEADER, item.id)
        .with_source(ResponseSource::Local),
    )
  }
}

fn strip_query(mut url: Url) -> Url {
  url.set_query(None);
  url.set_fragment(None);
  url
}
