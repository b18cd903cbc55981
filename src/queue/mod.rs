//! Persistent retry queue for mutations made while offline.
//!
//! Items live in the `pendingPosts` collection until a replay succeeds. The
//! [`Reconciler`] drains them when the configured sync signal arrives.

mod reconciler;
mod storage;

pub use reconciler::{Reconciler, SyncReport};
pub use storage::{QueueItem, QueueStorage, SqliteQueue};
