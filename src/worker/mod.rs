//! The offline worker: one explicitly constructed object that owns the cache,
//! the retry queue and the notification surfaces, and exposes a handler per
//! event.

mod background;

use color_eyre::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::cache::{CacheStorage, Namespace, SqliteStorage};
use crate::config::Config;
use crate::dispatch::{Dispatcher, Route};
use crate::error::OfflineError;
use crate::lifecycle::Lifecycle;
use crate::net::{HttpNetwork, Network, Request, Response};
use crate::notify::{ClientWindows, ConsoleSurface, NotificationClick, NotificationSurface, Notifier};
use crate::queue::{QueueItem, QueueStorage, Reconciler, SqliteQueue, SyncReport};
use crate::strategy::StrategyContext;

pub use background::{Background, BackgroundError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, shell not installed
  Parsed,
  /// Shell cached, old namespaces not yet purged
  Installed,
  /// Controls requests
  Activated,
}

pub struct Worker {
  network: Arc<dyn Network>,
  cache: Arc<dyn CacheStorage>,
  queue: Arc<dyn QueueStorage>,
  background: Arc<Background>,
  lifecycle: Lifecycle,
  dispatcher: Dispatcher,
  reconciler: Reconciler,
  notifier: Notifier,
  state: Mutex<WorkerState>,
}

impl Worker {
  pub fn new(
    config: &Config,
    network: Arc<dyn Network>,
    cache: Arc<dyn CacheStorage>,
    queue: Arc<dyn QueueStorage>,
    surface: Arc<dyn NotificationSurface>,
    windows: Arc<dyn ClientWindows>,
  ) -> Result<Self> {
    let background = Arc::new(Background::new());
    let ctx = StrategyContext {
      network: Arc::clone(&network),
      cache: Namespace::new(Arc::clone(&cache), config.cache.namespace()),
      offline_page: config.resolve(&config.cache.offline_page)?,
      background: Arc::clone(&background),
    };

    Ok(Self {
      lifecycle: Lifecycle::new(config, Arc::clone(&network), Arc::clone(&cache))?,
      dispatcher: Dispatcher::new(config, ctx, Arc::clone(&queue))?,
      reconciler: Reconciler::new(
        Arc::clone(&queue),
        Arc::clone(&network),
        config.resolve(&config.queue.endpoint)?,
        config.queue.sync_tag.as_str(),
      ),
      notifier: Notifier::new(config, surface, windows)?,
      network,
      cache,
      queue,
      background,
      state: Mutex::new(WorkerState::Parsed),
    })
  }

  /// Worker backed by the on-disk database, the real network and the console.
  pub fn open(config: &Config) -> Result<Self> {
    let path = config.storage.database_path()?;
    let cache = Arc::new(SqliteStorage::open(&path)?);
    let queue = Arc::new(SqliteQueue::open(&path)?);
    let network = Arc::new(HttpNetwork::new(&config.network)?);
    let console = Arc::new(ConsoleSurface);

    let worker = Self::new(config, network, cache, queue, console.clone(), console)?;
    worker.restore_state()?;
    Ok(worker)
  }

  /// Pick up where an earlier process left off: `Activated` when the stored
  /// activation marker names the current namespace, `Installed` when the
  /// namespace exists but was never activated.
  fn restore_state(&self) -> Result<()> {
    if self.lifecycle.is_active()? {
      self.set_state(WorkerState::Activated);
    } else if self.namespaces()?.iter().any(|n| n == self.current_namespace()) {
      self.set_state(WorkerState::Installed);
    }
    Ok(())
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    debug!(?state, "worker state");
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  pub fn current_namespace(&self) -> &str {
    self.lifecycle.current_namespace()
  }

  /// Pre-populate the shell cache. On failure nothing is stored and the worker
  /// stays uninstalled; call again to retry.
  pub async fn on_install(&self) -> Result<usize> {
    let stored = self.lifecycle.install().await?;
    if self.state() == WorkerState::Parsed {
      self.set_state(WorkerState::Installed);
    }
    Ok(stored)
  }

  /// Purge superseded namespaces and take control of requests immediately.
  pub async fn on_activate(&self) -> Result<Vec<String>> {
    let deleted = self.lifecycle.activate()?;
    self.set_state(WorkerState::Activated);
    Ok(deleted)
  }

  /// Route an outbound request. Before activation requests go straight to the
  /// network.
  pub async fn dispatch(&self, request: &Request) -> Result<Response> {
    if self.state() != WorkerState::Activated {
      debug!(url = %request.url, "not controlling yet, forwarding");
      return self.network.fetch(request).await;
    }
    self.dispatcher.dispatch(request).await
  }

  /// Look a request up in the current namespace without touching the network.
  pub fn cached(&self, request: &Request) -> Result<Response> {
    Namespace::new(Arc::clone(&self.cache), self.current_namespace())
      .lookup(request)?
      .ok_or_else(|| {
        OfflineError::CacheMiss {
          url: request.url.to_string(),
        }
        .into()
      })
  }

  pub fn classify(&self, request: &Request) -> Route {
    self.dispatcher.classify(request)
  }

  /// Show a notification for a push body. Returns the notification tag, or
  /// `None` when the push was dropped.
  pub async fn on_push(&self, body: Option<&[u8]>) -> Option<String> {
    self.notifier.on_push(body)
  }

  pub async fn on_notification_click(&self, click: &NotificationClick) -> Result<bool> {
    self.notifier.on_notification_click(click)
  }

  /// Handle a named sync signal. Returns `None` for tags this worker does not
  /// own.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    self.reconciler.on_sync(tag).await
  }

  /// The sync tag that drains the retry queue.
  pub fn sync_tag(&self) -> &str {
    self.reconciler.sync_tag()
  }

  pub fn queue_endpoint(&self) -> &url::Url {
    self.reconciler.endpoint()
  }

  /// Hand a mutation that could not be delivered over to the retry queue.
  pub fn enqueue(&self, payload: Value, auth_token: &str) -> Result<QueueItem> {
    let item = QueueItem::new(payload, auth_token);
    self.queue.push(&item)?;
    info!(id = %item.id, "queued mutation for replay");
    Ok(item)
  }

  pub fn pending(&self) -> Result<Vec<QueueItem>> {
    self.queue.list()
  }

  pub fn namespaces(&self) -> Result<Vec<String>> {
    self.cache.list_namespaces()
  }

  /// Wait for every detached task the handlers started.
  pub async fn wait_until_idle(&self) {
    self.background.wait_until_idle().await
  }

  pub fn background_errors(&self) -> Vec<BackgroundError> {
    self.background.take_errors()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{Method, ResponseSource};
  use crate::notify::VIEW_ACTION;
  use crate::testing::{test_config, url, MockNetwork, RecordingSurface};
  use serde_json::json;

  const SHELL: [&str; 5] = [
    "https://app.test/",
    "https://app.test/offline.html",
    "https://app.test/manifest.json",
    "https://app.test/icons/icon-192.png",
    "https://app.test/icons/icon-512.png",
  ];

  struct Harness {
    network: Arc<MockNetwork>,
    cache: Arc<SqliteStorage>,
    queue: Arc<SqliteQueue>,
    surface: Arc<RecordingSurface>,
    worker: Worker,
  }

  fn harness(config: &Config) -> Harness {
    let network = MockNetwork::new();
    let cache = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
    let surface = RecordingSurface::new();
    let worker = Worker::new(
      config,
      network.clone(),
      cache.clone(),
      queue.clone(),
      surface.clone(),
      surface.clone(),
    )
    .unwrap();
    Harness {
      network,
      cache,
      queue,
      surface,
      worker,
    }
  }

  fn serve_shell(network: &MockNetwork) {
    for asset in SHELL {
      network.respond(asset, 200, asset);
    }
  }

  #[tokio::test]
  async fn test_install_activate_then_serve_offline() {
    let h = harness(&test_config());
    serve_shell(&h.network);

    assert_eq!(h.worker.on_install().await.unwrap(), 5);
    assert_eq!(h.worker.state(), WorkerState::Installed);
    h.worker.on_activate().await.unwrap();
    assert_eq!(h.worker.state(), WorkerState::Activated);

    // Everything goes offline.
    for asset in SHELL {
      h.network.fail(asset);
    }
    let before = h.network.calls();
    let icon = h
      .worker
      .dispatch(&Request::get(url(SHELL[3])))
      .await
      .unwrap();
    assert_eq!(icon.source, ResponseSource::Cache);
    assert_eq!(h.network.calls(), before);

    let page = h
      .worker
      .dispatch(&Request::navigate(url("https://app.test/never-visited")))
      .await
      .unwrap();
    assert_eq!(page.source, ResponseSource::OfflineFallback);
    h.worker.wait_until_idle().await;
  }

  #[tokio::test]
  async fn test_failed_install_leaves_worker_uninstalled() {
    let h = harness(&test_config());
    serve_shell(&h.network);
    h.network.respond(SHELL[2], 500, "");

    assert!(h.worker.on_install().await.is_err());
    assert_eq!(h.worker.state(), WorkerState::Parsed);
    assert!(h.cache.list_namespaces().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_version_bump_purges_old_namespace_on_activate() {
    let old = harness(&test_config());
    serve_shell(&old.network);
    old.worker.on_install().await.unwrap();
    old.worker.on_activate().await.unwrap();

    let mut config = test_config();
    config.cache.version = 2;
    let new = Worker::new(
      &config,
      old.network.clone(),
      old.cache.clone(),
      old.queue.clone(),
      old.surface.clone(),
      old.surface.clone(),
    )
    .unwrap();
    new.on_install().await.unwrap();
    assert_eq!(
      new.namespaces().unwrap(),
      vec!["app-shell-v1".to_string(), "app-shell-v2".to_string()]
    );

    let deleted = new.on_activate().await.unwrap();
    assert_eq!(deleted, vec!["app-shell-v1".to_string()]);
    assert_eq!(new.namespaces().unwrap(), vec!["app-shell-v2".to_string()]);
  }

  #[tokio::test]
  async fn test_reopened_worker_restores_lifecycle_state() {
    let old = harness(&test_config());
    serve_shell(&old.network);
    old.worker.on_install().await.unwrap();
    old.worker.on_activate().await.unwrap();

    let reopen = |config: &Config| {
      let worker = Worker::new(
        config,
        old.network.clone(),
        old.cache.clone(),
        old.queue.clone(),
        old.surface.clone(),
        old.surface.clone(),
      )
      .unwrap();
      worker.restore_state().unwrap();
      worker
    };

    assert_eq!(reopen(&test_config()).state(), WorkerState::Activated);

    // A new version installed but not activated does not take control.
    let mut config = test_config();
    config.cache.version = 2;
    reopen(&config).on_install().await.unwrap();
    let installed = reopen(&config);
    assert_eq!(installed.state(), WorkerState::Installed);
    assert_eq!(
      installed.namespaces().unwrap(),
      vec!["app-shell-v1".to_string(), "app-shell-v2".to_string()]
    );

    installed.on_activate().await.unwrap();
    assert_eq!(reopen(&config).state(), WorkerState::Activated);

    let mut fresh = test_config();
    fresh.cache.version = 3;
    assert_eq!(reopen(&fresh).state(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_uncontrolled_requests_skip_the_cache() {
    let h = harness(&test_config());
    let request = Request::get(url("https://app.test/app.css"));
    h.network.respond(request.url.as_str(), 200, "css");

    h.worker.dispatch(&request).await.unwrap();
    h.worker.dispatch(&request).await.unwrap();
    assert_eq!(h.network.calls(), 2);
    assert!(h.cache.list_namespaces().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_offline_post_then_sync_replays() {
    let h = harness(&test_config());
    h.worker.on_activate().await.unwrap();
    let endpoint = "https://app.test/rest/v1/posts";

    let queued = h
      .worker
      .dispatch(
        &Request::new(Method::POST, url(endpoint))
          .with_header("authorization", "Bearer tok")
          .with_body(r#"{"title":"offline note"}"#),
      )
      .await
      .unwrap();
    assert_eq!(queued.status, 202);
    h.worker.enqueue(json!({ "title": "direct" }), "tok").unwrap();
    assert_eq!(h.worker.pending().unwrap().len(), 2);

    h.network.respond(endpoint, 201, "");
    let report = h.worker.on_sync(h.worker.sync_tag()).await.unwrap().unwrap();
    assert_eq!(report.replayed, 2);
    assert!(h.worker.pending().unwrap().is_empty());
    assert_eq!(h.queue.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_cached_lookup_reports_miss() {
    let h = harness(&test_config());
    serve_shell(&h.network);
    h.worker.on_install().await.unwrap();

    let hit = h.worker.cached(&Request::get(url(SHELL[1]))).unwrap();
    assert_eq!(hit.body, SHELL[1].as_bytes());

    let err = h
      .worker
      .cached(&Request::get(url("https://app.test/missing")))
      .unwrap_err();
    assert!(matches!(
      err.downcast_ref::<OfflineError>(),
      Some(OfflineError::CacheMiss { .. })
    ));
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let h = harness(&test_config());
    let tag = h.worker.on_push(Some(b"Book shared with you".as_slice())).await.unwrap();

    let opened = h
      .worker
      .on_notification_click(&NotificationClick {
        tag: tag.clone(),
        action: Some(VIEW_ACTION.to_string()),
      })
      .await
      .unwrap();
    assert!(opened);
    assert_eq!(*h.surface.closed.lock().unwrap(), vec![tag]);
    assert_eq!(h.surface.opened.lock().unwrap().len(), 1);
  }
}
