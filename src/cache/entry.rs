//! Cached response snapshots and the keys they are stored under.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Headers, Method, Response, ResponseSource};

/// A stored response snapshot plus the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// URL the response was fetched from
  pub url: String,
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn from_response(url: &Url, response: &Response) -> Self {
    Self {
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      source: ResponseSource::Cache,
    }
  }
}

/// Cache key for a request: hex SHA-256 of the method and the URL without its
/// fragment. Query strings are significant.
pub fn request_key(method: &Method, url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);

  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}
