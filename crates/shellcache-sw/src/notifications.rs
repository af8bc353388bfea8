//! Push notifications shown by the worker.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: Option<String>,
}

/// Values used when a push payload leaves fields out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    /// Absolute site URL opened when `start_url` cannot be.
    pub site_url: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "مؤسسة إعلانات العرب".to_string(),
            body: "لديك إشعار جديد من مؤسسة إعلانات العرب".to_string(),
            icon: "/assets/images/logo.svg".to_string(),
            badge: "/assets/images/badge.svg".to_string(),
            tag: "arabsad-notification".to_string(),
            require_interaction: true,
            actions: vec![
                NotificationAction {
                    action: "open".to_string(),
                    title: "فتح الموقع".to_string(),
                    icon: Some("/assets/images/open-icon.svg".to_string()),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "إغلاق".to_string(),
                    icon: Some("/assets/images/close-icon.svg".to_string()),
                },
            ],
            site_url: "https://arabsad.com".to_string(),
        }
    }
}

/// JSON body of a push message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// A notification as displayed.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

impl NotificationDefaults {
    /// Build a notification from a push payload, filling gaps from defaults.
    pub fn build(&self, payload: PushPayload) -> Notification {
        Notification {
            id: NotificationId::new(),
            title: payload.title.unwrap_or_else(|| self.title.clone()),
            body: payload.body.unwrap_or_else(|| self.body.clone()),
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            tag: self.tag.clone(),
            require_interaction: self.require_interaction,
            actions: self.actions.clone(),
        }
    }
}

/// Currently displayed notifications.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: HashMap<NotificationId, Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification. A notification with the same tag is replaced.
    pub fn show(&mut self, notification: Notification) -> NotificationId {
        self.shown.retain(|_, n| n.tag != notification.tag);
        let id = notification.id;
        self.shown.insert(id, notification);
        id
    }

    /// Close a notification.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    /// Look up a displayed notification.
    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Number of displayed notifications.
    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}
