//! Push notifications and notification clicks.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::clients::{ClientId, ClientKind};
use super::registration::Registration;
use super::storage::CacheStorage;
use super::traits::Network;
use crate::config::NotificationConfig;

/// Tag shared by every push notification, so a new push replaces the last.
pub const PUSH_TAG: &str = "study-update";

/// Fields a push payload may override. Anything missing or not a string
/// falls back to the configured default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub icon: Option<String>,
}

impl PushPayload {
  /// Read the optional JSON payload of a push event. Never fails.
  pub fn parse(data: Option<&[u8]>) -> Self {
    let Some(bytes) = data else {
      return Self::default();
    };

    let value: Value = match serde_json::from_slice(bytes) {
      Ok(value) => value,
      Err(e) => {
        warn!(error = %e, "Malformed push payload, using defaults");
        return Self::default();
      }
    };

    let field = |name: &str| {
      value
        .get(name)
        .and_then(Value::as_str)
        .map(String::from)
    };

    Self {
      title: field("title"),
      body: field("body"),
      icon: field("icon"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub id: u64,
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  /// URL opened or focused when clicked
  pub url: String,
}

/// Notifications currently on screen.
#[derive(Default)]
pub struct NotificationCenter {
  shown: Mutex<Vec<Notification>>,
  next_id: AtomicU64,
}

impl NotificationCenter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Display a notification, replacing any with the same tag.
  pub fn show(
    &self,
    title: String,
    body: String,
    icon: String,
    badge: String,
    tag: &str,
    url: String,
  ) -> Notification {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let notification = Notification {
      id,
      title,
      body,
      icon,
      badge,
      tag: tag.to_string(),
      url,
    };

    let mut shown = self.shown.lock().unwrap_or_else(|e| e.into_inner());
    shown.retain(|n| n.tag != notification.tag);
    shown.push(notification.clone());
    info!(id, title = %notification.title, "Notification shown");
    notification
  }

  pub fn close(&self, id: u64) -> bool {
    let mut shown = self.shown.lock().unwrap_or_else(|e| e.into_inner());
    let before = shown.len();
    shown.retain(|n| n.id != id);
    shown.len() != before
  }

  pub fn get(&self, id: u64) -> Option<Notification> {
    self
      .shown
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .iter()
      .find(|n| n.id == id)
      .cloned()
  }

  pub fn shown(&self) -> Vec<Notification> {
    self.shown.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

/// What a notification click did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  Focused(ClientId),
  Opened(ClientId),
}

fn resolve_defaults(
  payload: PushPayload,
  defaults: &NotificationConfig,
) -> (String, String, String) {
  (
    payload.title.unwrap_or_else(|| defaults.title.clone()),
    payload.body.unwrap_or_else(|| defaults.body.clone()),
    payload.icon.unwrap_or_else(|| defaults.icon.clone()),
  )
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  /// Show exactly one notification for a push event.
  pub fn handle_push(&self, data: Option<&[u8]>) -> Notification {
    let payload = PushPayload::parse(data);
    let (title, body, icon) = resolve_defaults(payload, &self.notification_defaults);
    self.notifications.show(
      title,
      body,
      icon,
      self.notification_defaults.badge.clone(),
      PUSH_TAG,
      self.policy().origin.to_string(),
    )
  }

  /// Focus a window already showing the app root, or open one.
  pub fn handle_notification_click(&self, notification_id: u64) -> Result<ClickOutcome> {
    let url = match self.notifications.get(notification_id) {
      Some(notification) => notification.url,
      None => {
        debug!(notification_id, "Clicked notification no longer shown");
        self.policy().origin.to_string()
      }
    };
    self.notifications.close(notification_id);

    let windows = self.clients().match_all(ClientKind::Window, true)?;
    if let Some(window) = windows.iter().find(|c| c.url == url) {
      self.clients().focus(window.id)?;
      return Ok(ClickOutcome::Focused(window.id));
    }

    let id = self
      .clients()
      .open_window(&url)
      .map_err(|e| eyre!("Failed to open window at {}: {}", url, e))?;
    Ok(ClickOutcome::Opened(id))
  }
}
