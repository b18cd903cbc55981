//! Versioned response cache.
//!
//! Responses are stored per namespace (`{prefix}-v{version}`) in SQLite. Exactly
//! one namespace is current; older ones are purged on activation.

mod entry;
mod namespace;
mod storage;

pub use entry::{request_key, CacheEntry};
pub use namespace::Namespace;
pub use storage::{CacheStorage, SqliteStorage};

pub(crate) use storage::parse_datetime;
