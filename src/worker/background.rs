//! Registry of detached tasks a handler started but does not await.
//!
//! Handlers spawn work here instead of calling `tokio::spawn` directly, so the
//! owner can wait for all of it before shutting down. Failures are logged and
//! sent on the registry's own error channel; the spawning handler never sees them.

use color_eyre::Result;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A failed background task.
#[derive(Debug, Clone)]
pub struct BackgroundError {
  pub task: String,
  pub message: String,
}

pub struct Background {
  handles: Mutex<Vec<JoinHandle<()>>>,
  errors_tx: mpsc::UnboundedSender<BackgroundError>,
  errors_rx: Mutex<mpsc::UnboundedReceiver<BackgroundError>>,
}

impl Background {
  pub fn new() -> Self {
    let (errors_tx, errors_rx) = mpsc::unbounded_channel();
    Self {
      handles: Mutex::new(Vec::new()),
      errors_tx,
      errors_rx: Mutex::new(errors_rx),
    }
  }

  /// Spawn a detached task and register it.
  pub fn spawn<F>(&self, task: impl Into<String>, future: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let task = task.into();
    let tx = self.errors_tx.clone();
    debug!(task = %task, "spawning background task");

    let handle = tokio::spawn(async move {
      if let Err(e) = future.await {
        warn!(task = %task, error = %e, "background task failed");
        // Ignore send errors - the registry may have been dropped
        let _ = tx.send(BackgroundError {
          task,
          message: e.to_string(),
        });
      }
    });

    let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
    handles.retain(|h| !h.is_finished());
    handles.push(handle);
  }

  /// Number of registered tasks that have not finished.
  #[cfg(test)]
  pub fn pending(&self) -> usize {
    let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
    handles.iter().filter(|h| !h.is_finished()).count()
  }

  /// Wait for every registered task, including ones spawned while waiting.
  pub async fn wait_until_idle(&self) {
    loop {
      let pending = {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *handles)
      };
      if pending.is_empty() {
        break;
      }

      for result in futures::future::join_all(pending).await {
        if let Err(e) = result {
          warn!(error = %e, "background task panicked");
        }
      }
    }
  }

  /// Drain the failures reported so far.
  pub fn take_errors(&self) -> Vec<BackgroundError> {
    let mut rx = self.errors_rx.lock().unwrap_or_else(PoisonError::into_inner);
    let mut errors = Vec::new();
    while let Ok(error) = rx.try_recv() {
      errors.push(error);
    }
    errors
  }
}

impl Default for Background {
  fn default() -> Self {
    Self::new()
  }
}
