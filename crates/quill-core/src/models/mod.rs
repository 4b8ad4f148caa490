//! Data models for Quill

mod comment;
mod conflict;
mod note;
mod notification;
mod presence;
mod user;

pub use comment::{Comment, CommentPosition};
pub use conflict::{Conflict, ConflictField, ConflictResolution, MERGE_SEPARATOR};
pub use note::{count_words, reading_time_minutes, Note, NoteId};
pub use notification::{Notification, NotificationKind};
pub use presence::{CursorPosition, EditingUser, PresenceInfo};
pub use user::UserInfo;
