//! Handle on one cache namespace.

use color_eyre::Result;
use std::sync::Arc;
use url::Url;

use super::entry::{request_key, CacheEntry};
use super::storage::CacheStorage;
use crate::net::{Method, Request, Response};

/// A named, versioned view over the shared cache storage.
///
/// Cheap to clone; every clone talks to the same storage.
#[derive(Clone)]
pub struct Namespace {
  storage: Arc<dyn CacheStorage>,
  id: String,
}

impl Namespace {
  pub fn new(storage: Arc<dyn CacheStorage>, id: impl Into<String>) -> Self {
    Self {
      storage,
      id: id.into(),
    }
  }

  /// Cached response for this request, tagged as coming from the cache.
  pub fn lookup(&self, request: &Request) -> Result<Option<Response>> {
    self.lookup_url(&request.method, &request.url)
  }

  pub fn lookup_url(&self, method: &Method, url: &Url) -> Result<Option<Response>> {
    let key = request_key(method, url);
    Ok(
      self
        .storage
        .match_key(&self.id, &key)?
        .map(CacheEntry::into_response),
    )
  }

  /// Write a response under the request's key (last write wins).
  pub fn store(&self, request: &Request, response: &Response) -> Result<()> {
    let key = request_key(&request.method, &request.url);
    let entry = CacheEntry::from_response(&request.url, response);
    self.storage.put(&self.id, &key, &entry)
  }
}
