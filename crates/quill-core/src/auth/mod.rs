//! Authenticated identity as handed out by Supabase auth.
//!
//! Sign-in flows live in the host app; this module only models the user the
//! realtime and persistence layers consume.

use serde::{Deserialize, Serialize};

use crate::util::normalize_text_option;

/// `user_metadata` block of a Supabase user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl AuthUser {
    #[must_use]
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            user_metadata: UserMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.user_metadata.full_name = normalize_text_option(Some(full_name.into()));
        self
    }

    /// Full name when set, otherwise the local part of the email, otherwise the id
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(name) = normalize_text_option(self.user_metadata.full_name.clone()) {
            return name;
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .map_or_else(|| self.id.clone(), str::to_string)
    }
}
