//! Request and response descriptors exchanged between the application, the
//! strategies and the network.

use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

pub use reqwest::Method;

/// Header map with lowercase names.
pub type Headers = BTreeMap<String, String>;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level navigation (loading a new page/view)
  Navigate,
  /// Subresource or programmatic request
  #[default]
  Other,
}

/// What kind of resource the request is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Style,
  Script,
  Image,
  Font,
  #[default]
  Empty,
}

impl Destination {
  /// Static assets that rarely change between deploys.
  pub fn is_static_asset(self) -> bool {
    matches!(self, Self::Style | Self::Script | Self::Image | Self::Font)
  }
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, String> {
    match s.to_lowercase().as_str() {
      "document" => Ok(Self::Document),
      "style" => Ok(Self::Style),
      "script" => Ok(Self::Script),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "" | "empty" => Ok(Self::Empty),
      other => Err(format!("unknown request destination: {}", other)),
    }
  }
}

/// An outbound request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
  pub destination: Destination,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
      mode: RequestMode::Other,
      destination: Destination::Empty,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_lowercase()).map(String::as_str)
  }

  /// Token from an `Authorization: Bearer ...` header.
  pub fn bearer_token(&self) -> Option<&str> {
    let value = self.header("authorization")?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
  }
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Served from the current cache namespace
  Cache,
  /// Cached offline page served in place of a failed navigation
  OfflineFallback,
  /// Synthesized locally (e.g. a queued mutation acknowledgement)
  Local,
}

/// A response snapshot.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_lowercase(), value.into());
    self
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
