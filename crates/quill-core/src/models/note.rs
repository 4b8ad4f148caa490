//! Note model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Average reading speed used for `reading_time`
const WORDS_PER_MINUTE: u32 = 200;

/// A unique identifier for a note row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A row of the `notes` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owning user
    pub user_id: String,
    pub title: String,
    /// Free text body
    pub content: String,
    /// Tag set; insertion order carries no meaning
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_pinned: bool,
    /// Soft-hidden flag
    #[serde(default)]
    pub is_archived: bool,
    /// Weak reference to a folder row
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub word_count: u32,
    /// Estimated minutes to read
    #[serde(default)]
    pub reading_time: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last user to write the row, used to tell remote edits from echoes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_by: Option<String>,
}

impl Note {
    /// Create a new note owned by `user_id`
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let content = content.into();
        let word_count = count_words(&content);
        Self {
            id: NoteId::new(),
            user_id: user_id.into(),
            title: title.into(),
            content,
            tags: Vec::new(),
            is_pinned: false,
            is_archived: false,
            folder_id: None,
            word_count,
            reading_time: reading_time_minutes(word_count),
            created_at: now,
            updated_at: now,
            last_edited_by: None,
        }
    }

    /// Builder-style tag assignment
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the content and refresh the derived counters
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.word_count = count_words(&self.content);
        self.reading_time = reading_time_minutes(self.word_count);
    }
}

/// Whitespace-delimited word count
#[must_use]
pub fn count_words(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

/// Minutes to read `word_count` words, at least one for non-empty text
#[must_use]
pub const fn reading_time_minutes(word_count: u32) -> u32 {
    if word_count == 0 {
        0
    } else {
        word_count.div_ceil(WORDS_PER_MINUTE)
    }
}
