//! Content conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserInfo;

/// Separator placed between local and remote text by a merge resolution
pub const MERGE_SEPARATOR: &str = "\n\n---\n\n";

/// Note field a conflict was detected on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    Content,
}

/// A remote write that raced unsaved local edits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub field: ConflictField,
    pub local_value: String,
    pub remote_value: String,
    pub remote_user: UserInfo,
    /// Detection time
    pub timestamp: DateTime<Utc>,
    /// `updated_at` of the remote row that caused the conflict
    pub remote_updated_at: DateTime<Utc>,
}

/// How the user chose to settle a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local buffer
    Local,
    /// Replace the buffer with the remote value
    Remote,
    /// Local text, separator, remote text
    Merge,
}

impl Conflict {
    /// Buffer content after applying `resolution`
    #[must_use]
    pub fn resolved_value(&self, resolution: ConflictResolution) -> String {
        match resolution {
            ConflictResolution::Local => self.local_value.clone(),
            ConflictResolution::Remote => self.remote_value.clone(),
            ConflictResolution::Merge => {
                format!("{}{MERGE_SEPARATOR}{}", self.local_value, self.remote_value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> Conflict {
        Conflict {
            id: "conflict_1".to_string(),
            field: ConflictField::Content,
            local_value: "mine".to_string(),
            remote_value: "theirs".to_string(),
            remote_user: UserInfo::anonymous("user-2"),
            timestamp: Utc::now(),
            remote_updated_at: Utc::now(),
        }
    }

    #[test]
    fn resolved_value_per_strategy() {
        let conflict = conflict();
        assert_eq!(conflict.resolved_value(ConflictResolution::Local), "mine");
        assert_eq!(conflict.resolved_value(ConflictResolution::Remote), "theirs");
        assert_eq!(
            conflict.resolved_value(ConflictResolution::Merge),
            "mine\n\n---\n\ntheirs"
        );
    }
}
