//! Editing roster with expiring typing indicators.
//!
//! Each entry stores the instant its typing flag lapses; a single periodic
//! sweep clears lapsed flags, and projections treat a lapsed flag as off even
//! before the sweep runs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::models::{CursorPosition, EditingUser, PresenceInfo, UserInfo};

#[derive(Debug, Clone)]
struct RosterEntry {
    user: UserInfo,
    cursor_position: Option<CursorPosition>,
    last_seen: DateTime<Utc>,
    typing_until: Option<Instant>,
    /// Listed by the presence channel, not only by broadcasts
    via_presence: bool,
}

impl RosterEntry {
    fn new(user: UserInfo) -> Self {
        Self {
            user,
            cursor_position: None,
            last_seen: Utc::now(),
            typing_until: None,
            via_presence: false,
        }
    }

    fn is_typing(&self, now: Instant) -> bool {
        self.typing_until.is_some_and(|until| until > now)
    }

    fn project(&self, now: Instant) -> EditingUser {
        EditingUser {
            id: self.user.id.clone(),
            email: self.user.email.clone(),
            full_name: self.user.full_name.clone(),
            avatar_url: self.user.avatar_url.clone(),
            cursor_position: self.cursor_position,
            last_seen: self.last_seen,
            is_typing: self.is_typing(now),
        }
    }
}

/// At most one entry per user id; insertion order is kept for display
#[derive(Debug, Clone, Default)]
pub struct EditingRoster {
    entries: HashMap<String, RosterEntry>,
    order: Vec<String>,
}

impl EditingRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, user: &UserInfo) -> &mut RosterEntry {
        if !self.entries.contains_key(&user.id) {
            self.order.push(user.id.clone());
        }
        let entry = self
            .entries
            .entry(user.id.clone())
            .or_insert_with(|| RosterEntry::new(user.clone()));
        entry.user = user.clone();
        entry.last_seen = Utc::now();
        entry
    }

    /// Presence join: make sure the user is listed without touching cursor or typing state
    pub fn upsert_presence(&mut self, presence: &PresenceInfo) {
        self.entry(&presence.user_info()).via_presence = true;
    }

    /// Match the presence-listed entries to a full snapshot.
    ///
    /// Entries only known from broadcasts are left alone.
    pub fn sync_presence(&mut self, presences: &[PresenceInfo]) {
        let present = presences
            .iter()
            .map(|presence| presence.user_id.as_str())
            .collect::<HashSet<_>>();
        let gone = self
            .entries
            .iter()
            .filter(|(id, entry)| entry.via_presence && !present.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        for id in gone {
            self.remove(&id);
        }
        for presence in presences {
            self.upsert_presence(presence);
        }
    }

    pub fn update_cursor(&mut self, user: &UserInfo, position: Option<CursorPosition>) {
        self.entry(user).cursor_position = position;
    }

    /// Light the typing flag until `until`, replacing any earlier deadline
    pub fn mark_typing(&mut self, user: &UserInfo, until: Instant) {
        self.entry(user).typing_until = Some(until);
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        self.order.retain(|id| id != user_id);
        self.entries.remove(user_id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Clear lapsed typing flags; returns how many were cleared
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut cleared = 0;
        for entry in self.entries.values_mut() {
            if entry.typing_until.is_some_and(|until| until <= now) {
                entry.typing_until = None;
                cleared += 1;
            }
        }
        cleared
    }

    #[must_use]
    pub fn user(&self, user_id: &str) -> Option<&UserInfo> {
        self.entries.get(user_id).map(|entry| &entry.user)
    }

    /// UI projection, never containing `exclude_id`
    #[must_use]
    pub fn snapshot(&self, now: Instant, exclude_id: &str) -> Vec<EditingUser> {
        self.order
            .iter()
            .filter(|id| id.as_str() != exclude_id)
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.project(now))
            .collect()
    }
}
