//! Drains the retry queue when connectivity comes back.
//!
//! Per item: `Pending -> Replaying -> {Removed | Pending}`. An item is removed
//! only after its replay returned a 2xx status. Delivery is at-least-once: a
//! crash between a successful replay and the removal re-sends the item on the
//! next drain, and every replay carries the item id as `Idempotency-Key` so the
//! backend can drop the duplicate.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use super::storage::{QueueItem, QueueStorage};
use crate::error::OfflineError;
use crate::net::{Method, Network, Request};

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Replayed successfully and removed
  pub replayed: usize,
  /// Replay failed; left pending for the next trigger
  pub retained: usize,
  /// Already being replayed by an overlapping drain
  pub skipped: usize,
}

pub struct Reconciler {
  queue: Arc<dyn QueueStorage>,
  network: Arc<dyn Network>,
  endpoint: Url,
  sync_tag: String,
  in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Marks an item as `Replaying` for as long as it is alive.
struct Claim {
  id: String,
  in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Claim {
  fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
    let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    set.insert(id.to_string()).then(|| Self {
      id: id.to_string(),
      in_flight: Arc::clone(in_flight),
    })
  }
}

impl Drop for Claim {
  fn drop(&mut self) {
    let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    set.remove(&self.id);
  }
}

impl Reconciler {
  pub fn new(
    queue: Arc<dyn QueueStorage>,
    network: Arc<dyn Network>,
    endpoint: Url,
    sync_tag: impl Into<String>,
  ) -> Self {
    Self {
      queue,
      network,
      endpoint,
      sync_tag: sync_tag.into(),
      in_flight: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  pub fn sync_tag(&self) -> &str {
    &self.sync_tag
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  /// Handle a sync signal. Tags other than ours are ignored.
  pub async fn on_sync(&self, tag: &str) -> Result<Option<SyncReport>> {
    if tag != self.sync_tag {
      debug!(tag, expected = %self.sync_tag, "ignoring sync signal");
      return Ok(None);
    }
    self.drain().await.map(Some)
  }

  /// Replay every pending item in insertion order.
  pub async fn drain(&self) -> Result<SyncReport> {
    let items = self.queue.list()?;
    let mut report = SyncReport::default();
    info!(pending = items.len(), "draining retry queue");

    for item in items {
      let Some(_claim) = Claim::acquire(&self.in_flight, &item.id) else {
        debug!(id = %item.id, "item already replaying");
        report.skipped += 1;
        continue;
      };

      // The listing may be stale: another drain can have delivered and
      // removed this item since.
      if !self.queue.contains(&item.id)? {
        debug!(id = %item.id, "item already delivered");
        report.skipped += 1;
        continue;
      }

      match self.replay(&item).await {
        Ok(()) => match self.queue.remove(&item.id) {
          Ok(_) => {
            debug!(id = %item.id, "replayed queued item");
            report.replayed += 1;
          }
          Err(e) => {
            // Stays queued and will be sent again.
            warn!(id = %item.id, error = %e, "replayed item could not be removed");
            report.retained += 1;
          }
        },
        Err(e) => {
          warn!(id = %item.id, error = %e, "replay failed, keeping item");
          report.retained += 1;
        }
      }
    }

    info!(
      replayed = report.replayed,
      retained = report.retained,
      skipped = report.skipped,
      "retry queue drained"
    );
    Ok(report)
  }

  async fn replay(&self, item: &QueueItem) -> std::result::Result<(), OfflineError> {
    let failure = |reason: String| OfflineError::ReplayFailure {
      id: item.id.clone(),
      reason,
    };

    let body = serde_json::to_vec(&item.payload).map_err(|e| failure(e.to_string()))?;
    let mut request = Request::new(Method::POST, self.endpoint.clone())
      .with_header("content-type", "application/json")
      .with_header("idempotency-key", item.id.as_str())
      .with_body(body);
    if !item.auth_token.is_empty() {
      request = request.with_header("authorization", format!("Bearer {}", item.auth_token));
    }

    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| failure(e.to_string()))?;

    if response.is_success() {
      Ok(())
    } else {
      Err(failure(format!("server returned {}", response.status)))
    }
  }
}
