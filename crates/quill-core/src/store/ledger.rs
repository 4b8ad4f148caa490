//! Stamps of this client's own row writes.
//!
//! Change feeds deliver every write back to its author. Each save is stamped
//! with its `updated_at`, so a row carrying a recorded stamp is an echo.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::{Note, NoteId};

/// Most recent writes remembered
const LEDGER_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct WriteLedger {
    writes: Arc<Mutex<VecDeque<(NoteId, DateTime<Utc>)>>>,
}

impl WriteLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, note_id: NoteId, updated_at: DateTime<Utc>) {
        let mut writes = self.writes.lock();
        if writes.contains(&(note_id, updated_at)) {
            return;
        }
        if writes.len() == LEDGER_CAPACITY {
            writes.pop_front();
        }
        writes.push_back((note_id, updated_at));
    }

    /// Whether `note` is the image of a write recorded here
    #[must_use]
    pub fn is_own(&self, note: &Note) -> bool {
        self.writes.lock().contains(&(note.id, note.updated_at))
    }
}
