//! Live view of the signed-in user's notes.
//!
//! `NotesSynchronizer` keeps an in-memory list in step with the row change feed
//! for the user's notes. Local writes go straight to the store; the list only
//! moves when the feed reports a change, so the last delivered write wins.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::bus::{
    ChangeKind, ChannelEvent, ChannelStatus, RealtimeChannel, RealtimeTransport, RowChange,
    RowEvent, RowFilter,
};
use crate::error::Result;
use crate::models::{Note, NoteId};
use crate::store::{NoteStore, WriteLedger};

const DEFAULT_NOTES_TABLE: &str = "notes";
const NOTICE_CAPACITY: usize = 64;

/// Channel topic for one user's note feed
#[must_use]
pub fn notes_topic(user_id: &str) -> String {
    format!("notes-changes:{user_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteChange {
    Created,
    Updated,
    Deleted,
}

/// Emitted after the list absorbed a change made elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteChangeNotice {
    pub change: NoteChange,
    pub note_id: NoteId,
    pub title: Option<String>,
}

#[derive(Debug, Default)]
struct NoteList {
    self_id: String,
    ledger: WriteLedger,
    notes: Vec<Note>,
}

impl NoteList {
    /// Fold one change into the list; returns a notice when something moved
    fn apply(&mut self, change: &RowChange) -> Option<NoteChangeNotice> {
        match change.kind {
            ChangeKind::Insert => {
                let note = decode_new(change)?;
                if self.notes.iter().any(|existing| existing.id == note.id) {
                    return None;
                }
                let notice = NoteChangeNotice {
                    change: NoteChange::Created,
                    note_id: note.id,
                    title: Some(note.title.clone()),
                };
                self.notes.push(note);
                Some(notice)
            }
            ChangeKind::Update => {
                let note = decode_new(change)?;
                let slot = self.notes.iter_mut().find(|existing| existing.id == note.id)?;
                let from_self = self.ledger.is_own(&note)
                    || note.last_edited_by.as_deref() == Some(self.self_id.as_str());
                let notice = NoteChangeNotice {
                    change: NoteChange::Updated,
                    note_id: note.id,
                    title: Some(note.title.clone()),
                };
                *slot = note;
                (!from_self).then_some(notice)
            }
            ChangeKind::Delete => {
                let note_id = match change.old.as_ref().and_then(|row| row.get("id")) {
                    Some(id) => match serde_json::from_value::<NoteId>(id.clone()) {
                        Ok(id) => id,
                        Err(error) => {
                            tracing::warn!("Ignoring delete with malformed id: {}", error);
                            return None;
                        }
                    },
                    None => {
                        tracing::warn!("Ignoring delete without an id");
                        return None;
                    }
                };
                let index = self.notes.iter().position(|note| note.id == note_id)?;
                let removed = self.notes.remove(index);
                Some(NoteChangeNotice {
                    change: NoteChange::Deleted,
                    note_id,
                    title: Some(removed.title),
                })
            }
        }
    }
}

fn decode_new(change: &RowChange) -> Option<Note> {
    change
        .new_record::<Note>()
        .map_err(|error| tracing::warn!("Ignoring malformed {:?} row: {}", change.kind, error))
        .ok()
}

pub struct NotesSynchronizer {
    transport: Arc<dyn RealtimeTransport>,
    user_id: Option<String>,
    table: String,
    list: Arc<Mutex<NoteList>>,
    notices: broadcast::Sender<NoteChangeNotice>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    listener: Option<JoinHandle<()>>,
}

impl NotesSynchronizer {
    #[must_use]
    pub fn new(transport: Arc<dyn RealtimeTransport>, user_id: Option<String>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            list: Arc::new(Mutex::new(NoteList {
                self_id: user_id.clone().unwrap_or_default(),
                ledger: WriteLedger::new(),
                notes: Vec::new(),
            })),
            transport,
            user_id,
            table: DEFAULT_NOTES_TABLE.to_string(),
            notices,
            channel: None,
            listener: None,
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Share the record of local saves, so their echoes land without a notice
    #[must_use]
    pub fn with_ledger(self, ledger: WriteLedger) -> Self {
        self.list.lock().ledger = ledger;
        self
    }

    /// Replace the list with the user's notes from `store`
    pub async fn load(&self, store: &dyn NoteStore) -> Result<usize> {
        let Some(user_id) = &self.user_id else {
            return Ok(0);
        };
        let notes = store.list_notes(user_id).await?;
        let count = notes.len();
        self.list.lock().notes = notes;
        tracing::debug!("Loaded {} notes for {}", count, user_id);
        Ok(count)
    }

    /// Subscribe to the user's change feed. A no-op when signed out.
    pub async fn start(&mut self) -> Result<()> {
        let Some(user_id) = self.user_id.clone() else {
            return Ok(());
        };
        if self.channel.is_some() {
            return Ok(());
        }

        let channel = self.transport.channel(&notes_topic(&user_id));
        channel.listen_row_changes(
            RowFilter::new(self.table.clone(), RowEvent::All).where_eq("user_id", &user_id),
        );
        let events = channel.subscribe().await?;
        self.listener = Some(tokio::spawn(listen(
            Arc::clone(&self.list),
            self.notices.clone(),
            events,
        )));
        self.channel = Some(channel);
        tracing::info!("Listening for note changes for {}", user_id);
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(channel) = self.channel.take() {
            if let Err(error) = channel.unsubscribe().await {
                tracing::warn!("Failed to leave {}: {}", channel.topic(), error);
            }
        }
    }

    #[must_use]
    pub fn notes(&self) -> Vec<Note> {
        self.list.lock().notes.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.channel.is_some()
    }

    /// Changes made by others, as they land in the list
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<NoteChangeNotice> {
        self.notices.subscribe()
    }
}

impl Drop for NotesSynchronizer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn listen(
    list: Arc<Mutex<NoteList>>,
    notices: broadcast::Sender<NoteChangeNotice>,
    mut events: mpsc::Receiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::RowChange(change) => {
                let notice = list.lock().apply(&change);
                if let Some(notice) = notice {
                    tracing::debug!("Note {} {:?}", notice.note_id, notice.change);
                    // No receivers is fine.
                    let _ = notices.send(notice);
                }
            }
            ChannelEvent::Status(ChannelStatus::Subscribed) => {
                tracing::debug!("Note feed subscribed");
            }
            ChannelEvent::Status(status) => {
                tracing::warn!("Note feed status {:?}", status);
            }
            ChannelEvent::Presence(_) | ChannelEvent::Broadcast { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::store::MemoryNoteStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn row(note: &Note) -> serde_json::Value {
        serde_json::to_value(note).unwrap()
    }

    fn list_for(user_id: &str) -> NoteList {
        NoteList {
            self_id: user_id.to_string(),
            ledger: WriteLedger::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn insert_appends_once() {
        let mut list = list_for("me");
        let note = Note::new("me", "First", "body");

        let notice = list.apply(&RowChange::insert("notes", row(&note))).unwrap();
        assert_eq!(notice.change, NoteChange::Created);
        assert!(list.apply(&RowChange::insert("notes", row(&note))).is_none());
        assert_eq!(list.notes.len(), 1);
    }

    #[test]
    fn update_replaces_known_rows_only() {
        let mut list = list_for("me");
        let mut note = Note::new("me", "Draft", "body");
        list.notes.push(note.clone());

        note.title = "Final".to_string();
        note.last_edited_by = Some("other".to_string());
        let notice = list.apply(&RowChange::update("notes", row(&note))).unwrap();
        assert_eq!(notice.title.as_deref(), Some("Final"));
        assert_eq!(list.notes[0].title, "Final");

        let stranger = Note::new("me", "Unknown", "");
        assert!(list.apply(&RowChange::update("notes", row(&stranger))).is_none());
        assert_eq!(list.notes.len(), 1);
    }

    #[test]
    fn own_updates_apply_silently() {
        let mut list = list_for("me");
        let mut note = Note::new("me", "Draft", "body");
        list.notes.push(note.clone());

        note.set_content("edited");
        note.last_edited_by = Some("me".to_string());
        assert!(list.apply(&RowChange::update("notes", row(&note))).is_none());
        assert_eq!(list.notes[0].content, "edited");
    }

    #[test]
    fn recorded_saves_apply_silently_without_editor_column() {
        let mut list = list_for("me");
        let mut note = Note::new("me", "Draft", "body");
        list.notes.push(note.clone());

        note.set_content("saved here");
        note.updated_at += chrono::Duration::seconds(1);
        list.ledger.record(note.id, note.updated_at);
        assert!(list.apply(&RowChange::update("notes", row(&note))).is_none());
        assert_eq!(list.notes[0].content, "saved here");

        note.set_content("saved elsewhere");
        note.updated_at += chrono::Duration::seconds(1);
        assert!(list.apply(&RowChange::update("notes", row(&note))).is_some());
    }

    #[test]
    fn delete_removes_by_old_id() {
        let mut list = list_for("me");
        let note = Note::new("me", "Gone", "");
        list.notes.push(note.clone());

        assert!(list
            .apply(&RowChange::delete("notes", json!({ "id": "not-a-uuid" })))
            .is_none());
        let notice = list
            .apply(&RowChange::delete("notes", json!({ "id": note.id.to_string() })))
            .unwrap();
        assert_eq!(notice.change, NoteChange::Deleted);
        assert!(list.notes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn follows_feed_for_own_notes() {
        let bus = LocalBus::default();
        let mine = Note::new("me", "Mine", "a");
        let store = MemoryNoteStore::with_notes([mine.clone(), Note::new("you", "Yours", "b")]);

        let mut sync = NotesSynchronizer::new(Arc::new(bus.clone()), Some("me".to_string()));
        assert_eq!(sync.load(&store).await.unwrap(), 1);
        sync.start().await.unwrap();
        let mut notices = sync.subscribe_notices();

        let created = Note::new("me", "New", "c");
        bus.emit_row_change(&RowChange::insert("notes", row(&created)));
        bus.emit_row_change(&RowChange::insert("notes", row(&Note::new("you", "Other", ""))));
        bus.emit_row_change(&RowChange::delete(
            "notes",
            json!({ "id": mine.id.to_string(), "user_id": "me" }),
        ));
        settle().await;

        let titles = sync.notes().into_iter().map(|note| note.title).collect::<Vec<_>>();
        assert_eq!(titles, vec!["New".to_string()]);
        assert_eq!(notices.recv().await.unwrap().change, NoteChange::Created);
        assert_eq!(notices.recv().await.unwrap().change, NoteChange::Deleted);

        sync.stop().await;
        assert!(!sync.is_running());
        assert_eq!(bus.member_count(&notes_topic("me")), 0);
    }

    #[tokio::test]
    async fn signed_out_synchronizer_is_inert() {
        let bus = LocalBus::default();
        let mut sync = NotesSynchronizer::new(Arc::new(bus.clone()), None);
        sync.start().await.unwrap();
        assert!(!sync.is_running());
        assert_eq!(sync.load(&MemoryNoteStore::new()).await.unwrap(), 0);
    }
}
