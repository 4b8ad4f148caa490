//! Presence tracking: who else has a given note open.
//!
//! All clients share one presence channel. Each announces its identity and
//! current note id; the tracker keeps the members on the same note, minus the
//! local user, as `online_users`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::AuthUser;
use crate::bus::{
    ChannelEvent, ChannelStatus, PresenceEvent, PresenceState, RealtimeChannel, RealtimeTransport,
};
use crate::error::Result;
use crate::models::{NoteId, PresenceInfo, UserInfo};

/// Topic shared by every client's presence announcements
pub const PRESENCE_TOPIC: &str = "online-users";

/// Membership view for one local user and note
#[derive(Debug, Clone, Default)]
struct PresenceRoster {
    self_id: String,
    note_id: Option<NoteId>,
    online_users: Vec<PresenceInfo>,
    is_online: bool,
}

impl PresenceRoster {
    fn new(self_id: impl Into<String>, note_id: Option<NoteId>) -> Self {
        Self {
            self_id: self_id.into(),
            note_id,
            online_users: Vec::new(),
            is_online: false,
        }
    }

    fn admits(&self, presence: &PresenceInfo) -> bool {
        presence.note_id == self.note_id && presence.user_id != self.self_id
    }

    /// Replace the roster from a full snapshot
    fn apply_sync(&mut self, state: &PresenceState) {
        let mut online = Vec::new();
        for presence in state.values().flatten() {
            if self.admits(presence) {
                upsert(&mut online, presence.clone());
            }
        }
        self.online_users = online;
    }

    /// Add newly joined members; a user already listed is refreshed in place
    fn apply_join(&mut self, new_presences: &[PresenceInfo]) {
        for presence in new_presences {
            if self.admits(presence) {
                upsert(&mut self.online_users, presence.clone());
            }
        }
    }

    fn apply_leave(&mut self, left_presences: &[PresenceInfo]) {
        self.online_users.retain(|user| {
            !left_presences
                .iter()
                .any(|left| left.user_id == user.user_id)
        });
    }

    fn clear(&mut self) {
        self.online_users.clear();
        self.is_online = false;
    }
}

fn upsert(users: &mut Vec<PresenceInfo>, presence: PresenceInfo) {
    if let Some(existing) = users.iter_mut().find(|user| user.user_id == presence.user_id) {
        *existing = presence;
    } else {
        users.push(presence);
    }
}

/// Presence tracker bound to one signed-in user and note
pub struct PresenceTracker {
    transport: Arc<dyn RealtimeTransport>,
    identity: Option<AuthUser>,
    note_id: Option<NoteId>,
    roster: Arc<Mutex<PresenceRoster>>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    listener: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        identity: Option<AuthUser>,
        note_id: Option<NoteId>,
    ) -> Self {
        let self_id = identity.as_ref().map(|user| user.id.clone()).unwrap_or_default();
        Self {
            transport,
            identity,
            note_id,
            roster: Arc::new(Mutex::new(PresenceRoster::new(self_id, note_id))),
            channel: None,
            listener: None,
        }
    }

    /// Join the presence channel and announce the local user.
    ///
    /// Without a signed-in user this is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.identity.is_none() || self.channel.is_some() {
            return Ok(());
        }

        let channel = self.transport.channel(PRESENCE_TOPIC);
        let events = channel.subscribe().await?;
        self.listener = Some(tokio::spawn(listen(
            Arc::clone(&channel),
            Arc::clone(&self.roster),
            events,
        )));
        self.channel = Some(channel);

        self.track().await;
        Ok(())
    }

    /// Announce (or re-announce) the local user on the current note.
    ///
    /// Best effort: a failed announce is logged and the tracker keeps running.
    pub async fn track(&self) {
        let (Some(user), Some(channel)) = (&self.identity, &self.channel) else {
            return;
        };

        self.roster.lock().is_online = true;
        let presence = PresenceInfo::new(&UserInfo::from(user), self.note_id);
        if let Err(error) = channel.track(presence).await {
            tracing::warn!("Failed to track presence for {}: {}", user.id, error);
        }
    }

    /// Leave the channel and forget every tracked member
    pub async fn disconnect(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(channel) = self.channel.take() {
            if let Err(error) = channel.unsubscribe().await {
                tracing::warn!("Failed to leave presence channel: {}", error);
            }
        }
        self.roster.lock().clear();
    }

    /// Members on the same note, excluding the local user
    #[must_use]
    pub fn online_users(&self) -> Vec<PresenceInfo> {
        self.roster.lock().online_users.clone()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.roster.lock().is_online
    }

    #[must_use]
    pub const fn note_id(&self) -> Option<NoteId> {
        self.note_id
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn listen(
    channel: Arc<dyn RealtimeChannel>,
    roster: Arc<Mutex<PresenceRoster>>,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Presence(PresenceEvent::Sync) => match channel.presence_state().await {
                Ok(state) => roster.lock().apply_sync(&state),
                Err(error) => tracing::warn!("Failed to read presence state: {}", error),
            },
            ChannelEvent::Presence(PresenceEvent::Join { new_presences, .. }) => {
                roster.lock().apply_join(&new_presences);
            }
            ChannelEvent::Presence(PresenceEvent::Leave { left_presences, .. }) => {
                roster.lock().apply_leave(&left_presences);
            }
            ChannelEvent::Status(ChannelStatus::Subscribed) => {
                tracing::debug!("Presence channel {} subscribed", channel.topic());
            }
            ChannelEvent::Status(status) => {
                tracing::warn!("Presence channel {} status {:?}", channel.topic(), status);
            }
            ChannelEvent::Broadcast { .. } | ChannelEvent::RowChange(_) => {}
        }
    }
}
