//! Public user card shared over realtime payloads

use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;

/// Identity fields other participants are allowed to see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserInfo {
    /// Placeholder card for a user known only by id
    #[must_use]
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            full_name: None,
            avatar_url: None,
        }
    }

    /// Name to render: full name, then email, then id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

impl From<&AuthUser> for UserInfo {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.user_metadata.full_name.clone(),
            avatar_url: user.user_metadata.avatar_url.clone(),
        }
    }
}
