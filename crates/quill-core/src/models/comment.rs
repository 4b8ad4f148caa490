//! Inline comment model (session memory only)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserInfo;
use crate::util::client_id;

/// Character range a comment is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPosition {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub author: UserInfo,
    pub position: CommentPosition,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub replies: Vec<Comment>,
}

impl Comment {
    #[must_use]
    pub fn new(content: impl Into<String>, author: UserInfo, position: CommentPosition) -> Self {
        Self {
            id: client_id("comment"),
            content: content.into(),
            author,
            position,
            created_at: Utc::now(),
            resolved: false,
            replies: Vec::new(),
        }
    }
}
