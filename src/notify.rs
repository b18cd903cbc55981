//! Push notifications: rendering push bodies and routing clicks.

use chrono::Utc;
use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, NotificationConfig};
use crate::error::OfflineError;

/// Primary action; opens the application.
pub const VIEW_ACTION: &str = "view";
pub const DISMISS_ACTION: &str = "dismiss";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  /// Milliseconds since the Unix epoch
  pub date_of_arrival: i64,
  pub primary_key: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

/// A click on a shown notification.
#[derive(Debug, Clone)]
pub struct NotificationClick {
  /// Identifier the surface returned from `show`
  pub tag: String,
  /// Action button that was clicked, `None` for the notification body
  pub action: Option<String>,
}

/// Where notifications are displayed.
pub trait NotificationSurface: Send + Sync {
  /// Display a notification and return an identifier for it.
  fn show(&self, payload: &NotificationPayload) -> Result<String>;

  fn close(&self, tag: &str) -> Result<()>;
}

/// Application windows the notification layer can bring forward.
pub trait ClientWindows: Send + Sync {
  fn open_or_focus(&self, url: &Url) -> Result<()>;
}

pub struct Notifier {
  config: NotificationConfig,
  root_url: Url,
  surface: Arc<dyn NotificationSurface>,
  windows: Arc<dyn ClientWindows>,
}

impl Notifier {
  pub fn new(
    config: &Config,
    surface: Arc<dyn NotificationSurface>,
    windows: Arc<dyn ClientWindows>,
  ) -> Result<Self> {
    Ok(Self {
      root_url: config.resolve(&config.notifications.root_url)?,
      config: config.notifications.clone(),
      surface,
      windows,
    })
  }

  /// Build a notification from a push body plus the configured defaults.
  pub fn render(&self, body: Option<&[u8]>) -> std::result::Result<NotificationPayload, OfflineError> {
    let body = body.ok_or_else(|| OfflineError::MalformedPushPayload("empty push".to_string()))?;
    let text = std::str::from_utf8(body)
      .map_err(|e| OfflineError::MalformedPushPayload(format!("body is not UTF-8: {}", e)))?
      .trim();
    if text.is_empty() {
      return Err(OfflineError::MalformedPushPayload("blank body".to_string()));
    }

    Ok(NotificationPayload {
      title: self.config.title.clone(),
      body: text.to_string(),
      icon: self.config.icon.clone(),
      badge: self.config.badge.clone(),
      vibrate: self.config.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: Utc::now().timestamp_millis(),
        primary_key: 1,
      },
      actions: vec![
        NotificationAction {
          action: VIEW_ACTION.to_string(),
          title: "View".to_string(),
          icon: self.config.view_icon.clone(),
        },
        NotificationAction {
          action: DISMISS_ACTION.to_string(),
          title: "Dismiss".to_string(),
          icon: self.config.dismiss_icon.clone(),
        },
      ],
    })
  }

  /// Show a notification for a push event. Fire-and-forget: failures are
  /// logged and the push is dropped. Returns the shown notification's tag.
  pub fn on_push(&self, body: Option<&[u8]>) -> Option<String> {
    let payload = match self.render(body) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(error = %e, "dropping push");
        return None;
      }
    };

    match self.surface.show(&payload) {
      Ok(tag) => {
        info!(tag = %tag, "notification shown");
        Some(tag)
      }
      Err(e) => {
        warn!(error = %e, "failed to show notification");
        None
      }
    }
  }

  /// Close the clicked notification and open the app for the primary action.
  /// Returns whether a window was opened.
  pub fn on_notification_click(&self, click: &NotificationClick) -> Result<bool> {
    self.surface.close(&click.tag)?;

    if click.action.as_deref() == Some(VIEW_ACTION) {
      self.windows.open_or_focus(&self.root_url)?;
      debug!(tag = %click.tag, url = %self.root_url, "opened application");
      return Ok(true);
    }

    Ok(false)
  }
}

/// Prints notifications and window requests to stdout.
pub struct ConsoleSurface;

impl NotificationSurface for ConsoleSurface {
  fn show(&self, payload: &NotificationPayload) -> Result<String> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(format!("{}-{}", payload.data.primary_key, payload.data.date_of_arrival))
  }

  fn close(&self, tag: &str) -> Result<()> {
    println!("closed notification {}", tag);
    Ok(())
  }
}

impl ClientWindows for ConsoleSurface {
  fn open_or_focus(&self, url: &Url) -> Result<()> {
    println!("open {}", url);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{test_config, url, RecordingSurface};

  fn notifier(surface: &Arc<RecordingSurface>) -> Notifier {
    Notifier::new(&test_config(), surface.clone(), surface.clone()).unwrap()
  }

  #[test]
  fn test_push_renders_defaults_and_actions() {
    let surface = RecordingSurface::new();
    let tag = notifier(&surface).on_push(Some(b"New song added".as_slice()));
    assert_eq!(tag.as_deref(), Some("notification-1"));

    let shown = surface.shown.lock().unwrap();
    let payload = &shown[0];
    assert_eq!(payload.body, "New song added");
    assert_eq!(payload.title, "New notification");
    assert_eq!(payload.vibrate, vec![100, 50, 100]);
    assert_eq!(payload.data.primary_key, 1);
    let actions: Vec<&str> = payload.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec![VIEW_ACTION, DISMISS_ACTION]);
  }

  #[test]
  fn test_payload_serializes_with_contract_names() {
    let surface = RecordingSurface::new();
    let payload = notifier(&surface).render(Some(b"hi".as_slice())).unwrap();
    let value = serde_json::to_value(&payload).unwrap();
    assert!(value["data"]["dateOfArrival"].is_i64());
    assert_eq!(value["data"]["primaryKey"], 1);
    assert_eq!(value["actions"][1]["action"], "dismiss");
    assert!(value["vibrate"].is_array());
  }

  #[test]
  fn test_malformed_push_shows_nothing() {
    let surface = RecordingSurface::new();
    let notifier = notifier(&surface);
    assert_eq!(notifier.on_push(None), None);
    assert_eq!(notifier.on_push(Some(b"   ".as_slice())), None);
    assert_eq!(notifier.on_push(Some([0xff, 0xfe].as_slice())), None);
    assert!(surface.shown.lock().unwrap().is_empty());
  }

  #[test]
  fn test_view_click_closes_and_opens_root() {
    let surface = RecordingSurface::new();
    let opened = notifier(&surface)
      .on_notification_click(&NotificationClick {
        tag: "n1".to_string(),
        action: Some(VIEW_ACTION.to_string()),
      })
      .unwrap();

    assert!(opened);
    assert_eq!(*surface.closed.lock().unwrap(), vec!["n1".to_string()]);
    assert_eq!(*surface.opened.lock().unwrap(), vec![url("https://app.test/")]);
  }

  #[test]
  fn test_other_clicks_only_close() {
    let surface = RecordingSurface::new();
    let notifier = notifier(&surface);
    for action in [Some(DISMISS_ACTION.to_string()), None] {
      let opened = notifier
        .on_notification_click(&NotificationClick {
          tag: "n1".to_string(),
          action,
        })
        .unwrap();
      assert!(!opened);
    }
    assert_eq!(surface.closed.lock().unwrap().len(), 2);
    assert!(surface.opened.lock().unwrap().is_empty());
  }
}
