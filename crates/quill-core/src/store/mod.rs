//! Row persistence for the notes table.
//!
//! `NoteStore` mirrors the table-scoped select/insert/update/delete surface of
//! the backend. Every update carries a fresh `updated_at` stamp, truncated to
//! the microsecond precision Postgres keeps so echoed rows compare equal.

mod ledger;
mod memory;
mod rest;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{count_words, reading_time_minutes, Note, NoteId};

pub use ledger::WriteLedger;
pub use memory::MemoryNoteStore;
pub use rest::RestNoteStore;

/// Partial row update; `updated_at` is stamped at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
    /// `Some(None)` clears the folder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Option<String>>,
    /// Only sent when the backend has the column; see `ClientConfig::track_editor`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NoteUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            title: None,
            content: None,
            word_count: None,
            reading_time: None,
            tags: None,
            is_pinned: None,
            is_archived: None,
            folder_id: None,
            last_edited_by: None,
            updated_at: Utc::now().trunc_subsecs(6),
        }
    }

    /// Content change, with the derived counters recomputed
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        let words = count_words(&content);
        self.word_count = Some(words);
        self.reading_time = Some(reading_time_minutes(words));
        self.content = Some(content);
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    #[must_use]
    pub const fn pinned(mut self, is_pinned: bool) -> Self {
        self.is_pinned = Some(is_pinned);
        self
    }

    #[must_use]
    pub const fn archived(mut self, is_archived: bool) -> Self {
        self.is_archived = Some(is_archived);
        self
    }

    #[must_use]
    pub fn folder(mut self, folder_id: Option<String>) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    #[must_use]
    pub fn edited_by(mut self, user_id: impl Into<String>) -> Self {
        self.last_edited_by = Some(user_id.into());
        self
    }

    /// Apply to an in-memory row
    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            note.set_content(content.clone());
        }
        if let Some(tags) = &self.tags {
            note.tags.clone_from(tags);
        }
        if let Some(is_pinned) = self.is_pinned {
            note.is_pinned = is_pinned;
        }
        if let Some(is_archived) = self.is_archived {
            note.is_archived = is_archived;
        }
        if let Some(folder_id) = &self.folder_id {
            note.folder_id.clone_from(folder_id);
        }
        if let Some(user_id) = &self.last_edited_by {
            note.last_edited_by = Some(user_id.clone());
        }
        note.updated_at = self.updated_at;
    }
}

impl Default for NoteUpdate {
    fn default() -> Self {
        Self::new()
    }
}

/// Table-scoped access to note rows
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn fetch_note(&self, id: &NoteId) -> Result<Option<Note>>;

    /// All rows owned by `user_id`, most recently updated first
    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>>;

    async fn insert_note(&self, note: &Note) -> Result<Note>;

    async fn update_note(&self, id: &NoteId, update: NoteUpdate) -> Result<Note>;

    async fn delete_note(&self, id: &NoteId) -> Result<()>;
}
