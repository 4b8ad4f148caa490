//! Collaborative editing session for a single note.
//!
//! ```text
//! Idle ──connect()──► Connecting ──Subscribed──► Active ──disconnect()──► TornDown
//!   ▲                                                                        │
//!   └──────────────────────────── switch_note() ─────────────────────────────┘
//! ```
//!
//! A session needs both a signed-in user and a note id; without either it
//! stays `Idle` and every operation is a no-op. While active it exchanges
//! cursor, typing and comment broadcasts with the other participants, applies
//! remote row updates to the local buffer, debounces content saves, and
//! records a [`Conflict`] when a remote write races unsaved local edits.

mod roster;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::auth::AuthUser;
use crate::bus::{
    ChannelEvent, ChannelStatus, PresenceEvent, PresenceState, RealtimeChannel, RealtimeTransport,
    RowEvent, RowFilter,
};
use crate::config::RealtimeSettings;
use crate::error::Result;
use crate::models::{
    Comment, CommentPosition, Conflict, ConflictField, ConflictResolution, CursorPosition,
    EditingUser, Note, NoteId, Notification, NotificationKind, PresenceInfo, UserInfo,
};
use crate::store::{NoteStore, NoteUpdate, WriteLedger};
use crate::util::client_id;

pub use roster::EditingRoster;

pub const EVENT_CURSOR_MOVE: &str = "cursor-move";
pub const EVENT_USER_TYPING: &str = "user-typing";
pub const EVENT_COMMENT_ADDED: &str = "comment-added";

const DEFAULT_NOTES_TABLE: &str = "notes";
const SAVE_FAILED_MESSAGE: &str = "Failed to save note. Please try again.";

/// Channel topic for the collaborators of one note
#[must_use]
pub fn session_topic(note_id: &NoteId) -> String {
    format!("note:{note_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    TornDown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorMovePayload {
    user_id: String,
    cursor_position: Option<CursorPosition>,
    user_info: UserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TypingPayload {
    user_id: String,
    user_info: UserInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommentAddedPayload {
    comment: Comment,
}

/// Work to do once the state lock is released
enum FollowUp {
    None,
    CancelSave,
    Save(String),
}

struct SessionInner {
    self_id: String,
    ledger: WriteLedger,
    note_id: Option<NoteId>,
    state: SessionState,
    note: Option<Note>,
    /// Local editor buffer
    content: String,
    last_saved_content: Option<String>,
    /// `updated_at` of the newest row this buffer is based on
    base_updated_at: Option<DateTime<Utc>>,
    /// Bumped on every local edit
    local_revision: u64,
    /// Highest local revision known to be persisted
    saved_revision: u64,
    /// Saves handed to the store that have not reported back
    saves_in_flight: usize,
    is_editing: bool,
    roster: EditingRoster,
    conflicts: Vec<Conflict>,
    comments: Vec<Comment>,
    notifications: Vec<Notification>,
    last_saved: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl SessionInner {
    fn new(self_id: String, note_id: Option<NoteId>, ledger: WriteLedger) -> Self {
        Self {
            self_id,
            ledger,
            note_id,
            state: SessionState::Idle,
            note: None,
            content: String::new(),
            last_saved_content: None,
            base_updated_at: None,
            local_revision: 0,
            saved_revision: 0,
            saves_in_flight: 0,
            is_editing: false,
            roster: EditingRoster::new(),
            conflicts: Vec::new(),
            comments: Vec::new(),
            notifications: Vec::new(),
            last_saved: None,
            error: None,
        }
    }

    fn load(&mut self, note: Note) {
        self.content.clone_from(&note.content);
        self.last_saved_content = Some(note.content.clone());
        self.base_updated_at = Some(note.updated_at);
        self.saved_revision = self.local_revision;
        self.note = Some(note);
    }

    const fn has_unsaved_changes(&self) -> bool {
        self.local_revision > self.saved_revision
    }

    fn notify(&mut self, kind: NotificationKind, title: &str, message: String) {
        self.notifications
            .push(Notification::new(kind, title, message));
    }

    fn admits(&self, presence: &PresenceInfo) -> bool {
        presence.user_id != self.self_id && presence.note_id == self.note_id
    }

    /// Rebuild the presence-derived roster from a full snapshot
    fn apply_presence_state(&mut self, state: &PresenceState) {
        let present = state
            .values()
            .flatten()
            .filter(|presence| self.admits(presence))
            .cloned()
            .collect::<Vec<_>>();
        self.roster.sync_presence(&present);
    }

    fn apply_event(&mut self, event: ChannelEvent, now: Instant, typing_timeout: Duration) {
        match event {
            ChannelEvent::Status(ChannelStatus::Subscribed) => {
                if self.state == SessionState::Connecting {
                    self.state = SessionState::Active;
                }
            }
            ChannelEvent::Status(ChannelStatus::Closed) => {
                tracing::debug!("Collaboration channel closed");
            }
            ChannelEvent::Status(status) => {
                tracing::warn!("Collaboration channel status {:?}", status);
            }
            ChannelEvent::Presence(PresenceEvent::Sync) => {}
            ChannelEvent::Presence(PresenceEvent::Join { new_presences, .. }) => {
                for presence in &new_presences {
                    if self.admits(presence) {
                        self.roster.upsert_presence(presence);
                    }
                }
            }
            ChannelEvent::Presence(PresenceEvent::Leave { left_presences, .. }) => {
                for presence in &left_presences {
                    if presence.user_id != self.self_id {
                        self.roster.remove(&presence.user_id);
                    }
                }
            }
            ChannelEvent::Broadcast { event, payload } => {
                self.apply_broadcast(&event, payload, now, typing_timeout);
            }
            ChannelEvent::RowChange(change) => match change.new_record::<Note>() {
                Ok(note) => self.apply_remote_note(note),
                Err(error) => tracing::warn!("Ignoring malformed note change: {}", error),
            },
        }
    }

    fn apply_broadcast(
        &mut self,
        event: &str,
        payload: Value,
        now: Instant,
        typing_timeout: Duration,
    ) {
        match event {
            EVENT_CURSOR_MOVE => match serde_json::from_value::<CursorMovePayload>(payload) {
                Ok(payload) if payload.user_id != self.self_id => {
                    let user = sender_info(payload.user_id, payload.user_info);
                    self.roster.update_cursor(&user, payload.cursor_position);
                }
                Ok(_) => {}
                Err(error) => tracing::warn!("Ignoring malformed cursor event: {}", error),
            },
            EVENT_USER_TYPING => match serde_json::from_value::<TypingPayload>(payload) {
                Ok(payload) if payload.user_id != self.self_id => {
                    let user = sender_info(payload.user_id, payload.user_info);
                    self.roster.mark_typing(&user, now + typing_timeout);
                }
                Ok(_) => {}
                Err(error) => tracing::warn!("Ignoring malformed typing event: {}", error),
            },
            EVENT_COMMENT_ADDED => match serde_json::from_value::<CommentAddedPayload>(payload) {
                Ok(CommentAddedPayload { comment }) => {
                    if self.comments.iter().any(|existing| existing.id == comment.id) {
                        return;
                    }
                    let message =
                        format!("{} commented on this note", comment.author.display_name());
                    self.comments.push(comment);
                    self.notify(NotificationKind::Comment, "New comment", message);
                }
                Err(error) => tracing::warn!("Ignoring malformed comment event: {}", error),
            },
            other => tracing::debug!("Ignoring broadcast event {}", other),
        }
    }

    /// Reconcile a row update for the open note with the local buffer
    fn apply_remote_note(&mut self, note: Note) {
        if Some(note.id) != self.note_id {
            return;
        }
        if self.ledger.is_own(&note)
            || note.last_edited_by.as_deref() == Some(self.self_id.as_str())
        {
            tracing::debug!("Ignoring echo of own save for note {}", note.id);
            return;
        }
        if self.base_updated_at.is_some_and(|base| note.updated_at < base) {
            tracing::debug!("Ignoring stale update for note {}", note.id);
            return;
        }
        if note.content == self.content {
            self.base_updated_at = Some(note.updated_at);
            self.last_saved_content = Some(note.content.clone());
            self.note = Some(note);
            return;
        }

        let remote_user = note
            .last_edited_by
            .as_deref()
            .map(|id| {
                self.roster
                    .user(id)
                    .cloned()
                    .unwrap_or_else(|| UserInfo::anonymous(id))
            })
            .unwrap_or_else(|| UserInfo::anonymous(note.user_id.clone()));

        if self.has_unsaved_changes() {
            tracing::info!(
                "Conflict on note {}: remote edit by {} raced unsaved local changes",
                note.id,
                remote_user.id
            );
            self.conflicts
                .retain(|conflict| conflict.field != ConflictField::Content);
            let message = format!(
                "{} changed this note while you were editing",
                remote_user.display_name()
            );
            self.conflicts.push(Conflict {
                id: client_id("conflict"),
                field: ConflictField::Content,
                local_value: self.content.clone(),
                remote_value: note.content,
                remote_user,
                timestamp: Utc::now(),
                remote_updated_at: note.updated_at,
            });
            self.notify(NotificationKind::Conflict, "Editing conflict", message);
            return;
        }

        let message = format!("{} updated this note", remote_user.display_name());
        self.content.clone_from(&note.content);
        self.last_saved_content = Some(note.content.clone());
        self.base_updated_at = Some(note.updated_at);
        self.note = Some(note);
        self.notify(NotificationKind::RemoteUpdate, "Note updated", message);
    }

    fn record_save(&mut self, revision: u64, content: String, saved: Note) {
        self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
        self.ledger.record(saved.id, saved.updated_at);
        if revision >= self.saved_revision {
            self.saved_revision = revision;
            self.last_saved_content = Some(content);
        }
        self.last_saved = Some(saved.updated_at);
        self.base_updated_at = self.base_updated_at.max(Some(saved.updated_at));
        self.note = Some(saved);
        self.error = None;
    }

    fn record_save_failure(&mut self) {
        self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
        self.error = Some(SAVE_FAILED_MESSAGE.to_string());
        self.notify(
            NotificationKind::Error,
            "Save failed",
            SAVE_FAILED_MESSAGE.to_string(),
        );
    }
}

/// Broadcast sender card keyed by the id the payload claims
fn sender_info(user_id: String, mut info: UserInfo) -> UserInfo {
    info.id = user_id;
    info
}

/// One user's editing session on one note
pub struct CollaborativeSession {
    transport: Arc<dyn RealtimeTransport>,
    store: Arc<dyn NoteStore>,
    identity: Option<AuthUser>,
    note_id: Option<NoteId>,
    settings: RealtimeSettings,
    table: String,
    inner: Arc<Mutex<SessionInner>>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    listener: Option<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

impl CollaborativeSession {
    #[must_use]
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        store: Arc<dyn NoteStore>,
        identity: Option<AuthUser>,
        note_id: Option<NoteId>,
    ) -> Self {
        let self_id = identity.as_ref().map(|user| user.id.clone()).unwrap_or_default();
        Self {
            transport,
            store,
            identity,
            note_id,
            settings: RealtimeSettings::default(),
            table: DEFAULT_NOTES_TABLE.to_string(),
            inner: Arc::new(Mutex::new(SessionInner::new(
                self_id,
                note_id,
                WriteLedger::new(),
            ))),
            channel: None,
            listener: None,
            reaper: None,
            pending_save: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RealtimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share the record of local saves with other listeners on the same rows
    #[must_use]
    pub fn with_ledger(self, ledger: WriteLedger) -> Self {
        self.inner.lock().ledger = ledger;
        self
    }

    /// Table whose row updates feed the session
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Load the note and join its collaboration channel.
    ///
    /// Without a user or a note the session stays `Idle`.
    pub async fn connect(&mut self) -> Result<()> {
        let (Some(user), Some(note_id)) = (self.identity.clone(), self.note_id) else {
            self.inner.lock().state = SessionState::Idle;
            return Ok(());
        };
        if self.channel.is_some() {
            return Ok(());
        }
        self.inner.lock().state = SessionState::Connecting;

        match self.store.fetch_note(&note_id).await {
            Ok(Some(note)) => self.inner.lock().load(note),
            Ok(None) => {
                tracing::warn!("Note {} not found, starting from an empty buffer", note_id);
            }
            Err(error) => {
                tracing::error!("Failed to load note {}: {}", note_id, error);
                self.inner.lock().error = Some("Failed to load note".to_string());
            }
        }

        let channel = self.transport.channel(&session_topic(&note_id));
        channel.listen_row_changes(
            RowFilter::new(self.table.clone(), RowEvent::Update).where_eq("id", note_id),
        );
        let events = match channel.subscribe().await {
            Ok(events) => events,
            Err(error) => {
                tracing::error!("Failed to join session for note {}: {}", note_id, error);
                let mut inner = self.inner.lock();
                inner.state = SessionState::TornDown;
                inner.error = Some("Failed to connect to collaboration session".to_string());
                return Err(error);
            }
        };

        self.listener = Some(tokio::spawn(listen(
            Arc::clone(&channel),
            Arc::clone(&self.inner),
            events,
            self.settings.typing_timeout(),
        )));
        self.reaper = Some(tokio::spawn(reap(
            Arc::clone(&self.inner),
            self.settings.typing_sweep(),
        )));

        let presence = PresenceInfo::new(&UserInfo::from(&user), Some(note_id));
        if let Err(error) = channel.track(presence).await {
            tracing::warn!("Failed to announce presence on note {}: {}", note_id, error);
        }
        self.channel = Some(channel);
        tracing::info!("Joined collaboration session for note {}", note_id);
        Ok(())
    }

    /// Leave the channel, cancel any pending save and forget the roster
    pub async fn disconnect(&mut self) {
        self.cancel_pending_save();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }

        let Some(channel) = self.channel.take() else {
            return;
        };
        if let Err(error) = channel.untrack().await {
            tracing::debug!("Failed to untrack presence: {}", error);
        }
        if let Err(error) = channel.unsubscribe().await {
            tracing::warn!("Failed to leave channel {}: {}", channel.topic(), error);
        }

        let mut inner = self.inner.lock();
        inner.state = SessionState::TornDown;
        inner.roster.clear();
        inner.is_editing = false;
        tracing::info!("Left collaboration session for {}", channel.topic());
    }

    /// Tear down and start over on another note (or none).
    ///
    /// The new note gets fresh state; saves still in flight for the old note
    /// report back into the state they were issued from.
    pub async fn switch_note(&mut self, note_id: Option<NoteId>) -> Result<()> {
        self.disconnect().await;
        let (self_id, ledger) = {
            let inner = self.inner.lock();
            (inner.self_id.clone(), inner.ledger.clone())
        };
        self.note_id = note_id;
        self.inner = Arc::new(Mutex::new(SessionInner::new(self_id, note_id, ledger)));
        self.connect().await
    }

    pub fn start_editing(&self) {
        self.inner.lock().is_editing = true;
    }

    pub fn stop_editing(&self) {
        let mut inner = self.inner.lock();
        inner.is_editing = false;
        inner.roster.clear();
    }

    /// Tell the other participants where the local caret is
    pub async fn broadcast_cursor_move(&self, position: Option<CursorPosition>) {
        let (Some(user), Some(channel)) = (&self.identity, &self.channel) else {
            return;
        };
        let payload = CursorMovePayload {
            user_id: user.id.clone(),
            cursor_position: position,
            user_info: UserInfo::from(user),
        };
        publish(channel, EVENT_CURSOR_MOVE, &payload).await;
    }

    /// Mark the local user as typing, locally and for the other participants
    pub async fn broadcast_user_typing(&self) {
        let Some(user) = &self.identity else {
            return;
        };
        let user_info = UserInfo::from(user);
        let until = Instant::now() + self.settings.typing_timeout();
        self.inner.lock().roster.mark_typing(&user_info, until);

        if let Some(channel) = &self.channel {
            let payload = TypingPayload {
                user_id: user.id.clone(),
                user_info,
            };
            publish(channel, EVENT_USER_TYPING, &payload).await;
        }
    }

    /// Record a local edit and persist it after the debounce window.
    ///
    /// A newer call within the window replaces the pending save. Content equal
    /// to the last saved value cancels any pending save instead, unless an
    /// earlier save is still in flight and may yet overwrite it.
    pub fn save_note_content(&self, content: impl Into<String>) {
        let (Some(user), Some(note_id)) = (&self.identity, self.note_id) else {
            return;
        };
        let content = content.into();

        let revision = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::TornDown {
                return;
            }
            inner.content.clone_from(&content);
            if inner.saves_in_flight == 0
                && inner.last_saved_content.as_deref() == Some(content.as_str())
            {
                inner.saved_revision = inner.local_revision;
                None
            } else {
                inner.local_revision += 1;
                Some(inner.local_revision)
            }
        };
        let Some(revision) = revision else {
            self.cancel_pending_save();
            return;
        };

        let store = Arc::clone(&self.store);
        let inner = Arc::clone(&self.inner);
        let user_id = user.id.clone();
        let delay = self.settings.save_debounce();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.lock().saves_in_flight += 1;
            // Detached so a later edit cannot abort a request already in flight.
            tokio::spawn(persist_content(store, inner, note_id, user_id, content, revision));
        });

        if let Some(previous) = self.pending_save.lock().replace(timer) {
            previous.abort();
        }
    }

    fn cancel_pending_save(&self) {
        if let Some(pending) = self.pending_save.lock().take() {
            pending.abort();
        }
    }

    /// Settle a pending conflict; returns the resulting buffer, `None` if the id is unknown
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Option<String> {
        let (resolved, follow_up) = {
            let mut inner = self.inner.lock();
            let index = inner
                .conflicts
                .iter()
                .position(|conflict| conflict.id == conflict_id)?;
            let mut conflict = inner.conflicts.remove(index);
            inner.base_updated_at = inner.base_updated_at.max(Some(conflict.remote_updated_at));
            conflict.local_value.clone_from(&inner.content);
            let resolved = conflict.resolved_value(resolution);

            let follow_up = match resolution {
                ConflictResolution::Local => FollowUp::None,
                ConflictResolution::Merge => FollowUp::Save(resolved.clone()),
                ConflictResolution::Remote => {
                    if let Some(note) = inner.note.as_mut() {
                        note.set_content(resolved.clone());
                        note.updated_at = conflict.remote_updated_at;
                    }
                    if inner.saves_in_flight > 0 {
                        // The in-flight text would overwrite the remote value in the store.
                        FollowUp::Save(resolved.clone())
                    } else {
                        inner.content.clone_from(&resolved);
                        inner.last_saved_content = Some(resolved.clone());
                        inner.saved_revision = inner.local_revision;
                        FollowUp::CancelSave
                    }
                }
            };
            (resolved, follow_up)
        };
        tracing::info!("Resolved conflict {} with {:?}", conflict_id, resolution);

        match follow_up {
            FollowUp::None => {}
            FollowUp::CancelSave => self.cancel_pending_save(),
            FollowUp::Save(content) => self.save_note_content(content),
        }
        Some(resolved)
    }

    /// Drop a conflict without touching the buffer
    pub fn dismiss_conflict(&self, conflict_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.conflicts.len();
        inner.conflicts.retain(|conflict| conflict.id != conflict_id);
        inner.conflicts.len() != before
    }

    /// Add a comment locally and share it with the other participants
    pub async fn add_comment(
        &self,
        content: impl Into<String>,
        position: CommentPosition,
    ) -> Option<Comment> {
        let user = self.identity.as_ref()?;
        let comment = Comment::new(content, UserInfo::from(user), position);
        self.inner.lock().comments.push(comment.clone());

        if let Some(channel) = &self.channel {
            let payload = CommentAddedPayload {
                comment: comment.clone(),
            };
            publish(channel, EVENT_COMMENT_ADDED, &payload).await;
        }
        Some(comment)
    }

    pub fn reply_to_comment(
        &self,
        comment_id: &str,
        content: impl Into<String>,
    ) -> Option<Comment> {
        let user = self.identity.as_ref()?;
        let mut inner = self.inner.lock();
        let parent = inner
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)?;
        let reply = Comment::new(content, UserInfo::from(user), parent.position);
        parent.replies.push(reply.clone());
        Some(reply)
    }

    pub fn resolve_comment(&self, comment_id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
            .map(|comment| comment.resolved = true)
            .is_some()
    }

    pub fn delete_comment(&self, comment_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.comments.len();
        inner.comments.retain(|comment| comment.id != comment_id);
        inner.comments.len() != before
    }

    pub fn add_notification(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Notification {
        let notification = Notification::new(kind, title, message);
        self.inner.lock().notifications.push(notification.clone());
        notification
    }

    pub fn mark_notification_read(&self, notification_id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner
            .notifications
            .iter_mut()
            .find(|notification| notification.id == notification_id)
            .map(|notification| notification.read = true)
            .is_some()
    }

    pub fn clear_notification(&self, notification_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.notifications.len();
        inner
            .notifications
            .retain(|notification| notification.id != notification_id);
        inner.notifications.len() != before
    }

    pub fn clear_all_notifications(&self) {
        self.inner.lock().notifications.clear();
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    #[must_use]
    pub const fn note_id(&self) -> Option<NoteId> {
        self.note_id
    }

    #[must_use]
    pub fn note(&self) -> Option<Note> {
        self.inner.lock().note.clone()
    }

    /// Current local buffer
    #[must_use]
    pub fn content(&self) -> String {
        self.inner.lock().content.clone()
    }

    /// Other participants; never contains the local user
    #[must_use]
    pub fn editing_users(&self) -> Vec<EditingUser> {
        let inner = self.inner.lock();
        inner.roster.snapshot(Instant::now(), &inner.self_id)
    }

    #[must_use]
    pub fn is_editing(&self) -> bool {
        self.inner.lock().is_editing
    }

    #[must_use]
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.inner.lock().conflicts.clone()
    }

    #[must_use]
    pub fn comments(&self) -> Vec<Comment> {
        self.inner.lock().comments.clone()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().notifications.clone()
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.inner
            .lock()
            .notifications
            .iter()
            .filter(|notification| !notification.read)
            .count()
    }

    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.lock().has_unsaved_changes()
    }

    #[must_use]
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_saved
    }

    /// Last user-facing error message
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn clear_error(&self) {
        self.inner.lock().error = None;
    }
}

impl Drop for CollaborativeSession {
    fn drop(&mut self) {
        self.cancel_pending_save();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
    }
}

async fn publish<T: Serialize + Sync>(
    channel: &Arc<dyn RealtimeChannel>,
    event: &str,
    payload: &T,
) {
    let payload = match serde_json::to_value(payload) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!("Failed to encode {} payload: {}", event, error);
            return;
        }
    };
    if let Err(error) = channel.send(event, payload).await {
        tracing::debug!("Broadcast {} on {} failed: {}", event, channel.topic(), error);
    }
}

async fn persist_content(
    store: Arc<dyn NoteStore>,
    inner: Arc<Mutex<SessionInner>>,
    note_id: NoteId,
    user_id: String,
    content: String,
    revision: u64,
) {
    let update = NoteUpdate::new().content(content.clone()).edited_by(user_id);
    inner.lock().ledger.record(note_id, update.updated_at);
    match store.update_note(&note_id, update).await {
        Ok(saved) => {
            tracing::debug!("Saved note {} at revision {}", note_id, revision);
            inner.lock().record_save(revision, content, saved);
        }
        Err(error) => {
            tracing::error!("Failed to save note {}: {}", note_id, error);
            inner.lock().record_save_failure();
        }
    }
}

async fn listen(
    channel: Arc<dyn RealtimeChannel>,
    inner: Arc<Mutex<SessionInner>>,
    mut events: mpsc::Receiver<ChannelEvent>,
    typing_timeout: Duration,
) {
    while let Some(event) = events.recv().await {
        if event == ChannelEvent::Presence(PresenceEvent::Sync) {
            match channel.presence_state().await {
                Ok(state) => inner.lock().apply_presence_state(&state),
                Err(error) => tracing::warn!("Failed to read presence state: {}", error),
            }
            continue;
        }
        inner.lock().apply_event(event, Instant::now(), typing_timeout);
    }
}

/// Periodic sweep clearing lapsed typing indicators
async fn reap(inner: Arc<Mutex<SessionInner>>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let cleared = inner.lock().roster.sweep(Instant::now());
        if cleared > 0 {
            tracing::trace!("Cleared {} typing indicators", cleared);
        }
    }
}

#[cfg(test)]
mod tests;
