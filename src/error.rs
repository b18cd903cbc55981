//! Failure taxonomy for the offline layer.
//!
//! These travel inside `color_eyre::Report`; callers that need to branch on the
//! kind recover them with `Report::downcast_ref::<OfflineError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OfflineError {
  /// A fetch could not complete (connection refused, timeout, DNS, offline).
  #[error("network unavailable for {url}: {reason}")]
  NetworkUnavailable { url: String, reason: String },

  /// A lookup found nothing for the request key.
  #[error("no cached response for {url}")]
  CacheMiss { url: String },

  /// A required shell asset could not be fetched during install.
  #[error("install failed: could not fetch {url}: {reason}")]
  InstallAssetFailure { url: String, reason: String },

  /// A queued item could not be replayed; it stays in the queue.
  #[error("replay of queued item {id} failed: {reason}")]
  ReplayFailure { id: String, reason: String },

  /// A push event carried no usable text body.
  #[error("malformed push payload: {0}")]
  MalformedPushPayload(String),

  /// Navigation failed on network and cache, and the offline page is not cached.
  #[error("{url} is unavailable offline")]
  OfflineUnavailable { url: String },
}

impl OfflineError {
  pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
    Self::NetworkUnavailable {
      url: url.into(),
      reason: reason.to_string(),
    }
  }

  /// Whether this error means the network path failed and a fallback may apply.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::NetworkUnavailable { .. })
  }
}

/// Returns true if the report wraps a `NetworkUnavailable`.
pub fn is_network_failure(report: &color_eyre::Report) -> bool {
  report
    .downcast_ref::<OfflineError>()
    .is_some_and(OfflineError::is_network)
}
