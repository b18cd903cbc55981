//! Install and activate: populating the shell cache and retiring old versions.

use color_eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{request_key, CacheEntry, CacheStorage};
use crate::config::Config;
use crate::error::OfflineError;
use crate::net::{Network, Request};

pub struct Lifecycle {
  network: Arc<dyn Network>,
  storage: Arc<dyn CacheStorage>,
  current: String,
  shell_assets: Vec<Url>,
}

impl Lifecycle {
  pub fn new(
    config: &Config,
    network: Arc<dyn Network>,
    storage: Arc<dyn CacheStorage>,
  ) -> Result<Self> {
    let shell_assets = config
      .cache
      .shell_assets
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      network,
      storage,
      current: config.cache.namespace(),
      shell_assets,
    })
  }

  pub fn current_namespace(&self) -> &str {
    &self.current
  }

  /// Whether the last activation recorded in storage was for the current
  /// namespace.
  pub fn is_active(&self) -> Result<bool> {
    Ok(self.storage.active()?.as_deref() == Some(self.current.as_str()))
  }

  /// Fetch every shell asset and store them in the current namespace.
  ///
  /// All-or-nothing: if any asset fails to fetch or answers with a non-2xx
  /// status, nothing is written and the install must be retried.
  pub async fn install(&self) -> Result<usize> {
    info!(namespace = %self.current, assets = self.shell_assets.len(), "installing");

    let fetches = self.shell_assets.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let result = self.network.fetch(&request).await;
      (request, result)
    });

    let mut entries = Vec::with_capacity(self.shell_assets.len());
    for (request, result) in join_all(fetches).await {
      let failure = |reason: String| OfflineError::InstallAssetFailure {
        url: request.url.to_string(),
        reason,
      };

      let response = result.map_err(|e| failure(e.to_string()))?;
      if !response.is_success() {
        return Err(failure(format!("server returned {}", response.status)).into());
      }

      debug!(url = %request.url, "shell asset fetched");
      entries.push((
        request_key(&request.method, &request.url),
        CacheEntry::from_response(&request.url, &response),
      ));
    }

    self.storage.put_all(&self.current, &entries)?;
    info!(namespace = %self.current, stored = entries.len(), "install complete");
    Ok(entries.len())
  }

  /// Delete every namespace except the current one. Returns the deleted ids.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for namespace in self.storage.list_namespaces()? {
      if namespace != self.current && self.storage.delete(&namespace)? {
        info!(namespace = %namespace, "deleted stale cache namespace");
        deleted.push(namespace);
      }
    }

    self.storage.open(&self.current)?;
    self.storage.set_active(&self.current)?;
    info!(namespace = %self.current, "activated");
    Ok(deleted)
  }
}
