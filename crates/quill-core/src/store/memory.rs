//! In-memory `NoteStore` for tests and offline embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{NoteStore, NoteUpdate};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId};

#[derive(Clone, Default)]
pub struct MemoryNoteStore {
    rows: Arc<Mutex<HashMap<NoteId, Note>>>,
    updates: Arc<Mutex<Vec<(NoteId, NoteUpdate)>>>,
    fail_writes: Arc<AtomicBool>,
    write_latency: Arc<Mutex<Duration>>,
}

impl MemoryNoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `notes`
    #[must_use]
    pub fn with_notes(notes: impl IntoIterator<Item = Note>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock();
            for note in notes {
                rows.insert(note.id, note);
            }
        }
        store
    }

    /// Make subsequent writes fail, simulating an unreachable backend
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every update by `latency`, simulating a slow round trip
    pub fn set_write_latency(&self, latency: Duration) {
        *self.write_latency.lock() = latency;
    }

    /// Every update issued so far, in order
    #[must_use]
    pub fn updates(&self) -> Vec<(NoteId, NoteUpdate)> {
        self.updates.lock().clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::Api("backend unavailable (503)".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn fetch_note(&self, id: &NoteId) -> Result<Option<Note>> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>> {
        let mut notes = self
            .rows
            .lock()
            .values()
            .filter(|note| note.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    async fn insert_note(&self, note: &Note) -> Result<Note> {
        self.check_writable()?;
        let mut rows = self.rows.lock();
        if rows.contains_key(&note.id) {
            return Err(Error::InvalidInput(format!("duplicate note id {}", note.id)));
        }
        rows.insert(note.id, note.clone());
        Ok(note.clone())
    }

    async fn update_note(&self, id: &NoteId, update: NoteUpdate) -> Result<Note> {
        self.updates.lock().push((*id, update.clone()));
        let latency = *self.write_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_writable()?;
        let mut rows = self.rows.lock();
        let note = rows
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        update.apply_to(note);
        Ok(note.clone())
    }

    async fn delete_note(&self, id: &NoteId) -> Result<()> {
        self.check_writable()?;
        self.rows
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}
