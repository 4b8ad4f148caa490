//! Presence and editing-roster models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NoteId, UserInfo};

/// Payload announced on a presence channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Note the user has open, if any
    #[serde(default)]
    pub note_id: Option<NoteId>,
    pub online_at: DateTime<Utc>,
}

impl PresenceInfo {
    /// Announce `user` as present on `note_id`
    #[must_use]
    pub fn new(user: &UserInfo, note_id: Option<NoteId>) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar_url: user.avatar_url.clone(),
            note_id,
            online_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            id: self.user_id.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Caret location inside a note body, in character offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<usize>,
}

impl CursorPosition {
    #[must_use]
    pub const fn at(offset: usize) -> Self {
        Self {
            offset,
            selection_end: None,
        }
    }
}

/// Another participant in a collaborative session, as exposed to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditingUser {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub cursor_position: Option<CursorPosition>,
    pub last_seen: DateTime<Utc>,
    pub is_typing: bool,
}
