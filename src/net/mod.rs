//! Outbound network seam.
//!
//! Everything that leaves the process goes through [`Network::fetch`], so the
//! strategies, the lifecycle manager and the reconciler can run against a
//! scripted network in tests.

mod client;
mod types;

use async_trait::async_trait;
use color_eyre::Result;

pub use client::HttpNetwork;
pub use types::{Destination, Headers, Method, Request, Response, ResponseSource};

/// Something that can perform a fetch.
///
/// Any HTTP status is a successful fetch. Only transport failures are errors, and
/// they are reported as [`crate::error::OfflineError::NetworkUnavailable`].
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}
