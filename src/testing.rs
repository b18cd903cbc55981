//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::error::OfflineError;
use crate::net::{Network, Request, Response};
use crate::notify::{ClientWindows, NotificationPayload, NotificationSurface};

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

pub fn test_config() -> Config {
  Config::new(url("https://app.test/"))
}

#[derive(Clone)]
enum Scripted {
  Respond(u16, Vec<u8>),
  Fail,
}

/// Network that answers from a script and records every request.
///
/// URLs without a script fail as if offline.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Scripted>>,
  requests: Mutex<Vec<Request>>,
  delay: Mutex<Option<Duration>>,
  call_delays: Mutex<HashMap<usize, Duration>>,
}

impl MockNetwork {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Scripted::Respond(status, body.as_bytes().to_vec()),
    );
  }

  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Scripted::Fail);
  }

  /// Delay every subsequent response.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Delay only the `n`th call (1-based), overriding `set_delay`.
  pub fn delay_call(&self, n: usize, delay: Duration) {
    self.call_delays.lock().unwrap().insert(n, delay);
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let call = {
      let mut requests = self.requests.lock().unwrap();
      requests.push(request.clone());
      requests.len()
    };

    let delay = self
      .call_delays
      .lock()
      .unwrap()
      .get(&call)
      .copied()
      .or(*self.delay.lock().unwrap());
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let scripted = self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned();
    match scripted {
      Some(Scripted::Respond(status, body)) => Ok(Response::new(status, body)),
      Some(Scripted::Fail) | None => {
        Err(OfflineError::network(request.url.as_str(), "connection refused").into())
      }
    }
  }
}

/// Notification and window surface that records what it was asked to do.
#[derive(Default)]
pub struct RecordingSurface {
  pub shown: Mutex<Vec<NotificationPayload>>,
  pub closed: Mutex<Vec<String>>,
  pub opened: Mutex<Vec<Url>>,
}

impl RecordingSurface {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }
}

impl NotificationSurface for RecordingSurface {
  fn show(&self, payload: &NotificationPayload) -> Result<String> {
    let mut shown = self.shown.lock().unwrap();
    shown.push(payload.clone());
    Ok(format!("notification-{}", shown.len()))
  }

  fn close(&self, tag: &str) -> Result<()> {
    self.closed.lock().unwrap().push(tag.to_string());
    Ok(())
  }
}

impl ClientWindows for RecordingSurface {
  fn open_or_focus(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}
