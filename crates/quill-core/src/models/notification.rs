//! In-app notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::client_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
    /// Another user changed the open note
    RemoteUpdate,
    /// A remote change raced unsaved local edits
    Conflict,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: client_id("notification"),
            kind,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            read: false,
        }
    }
}
