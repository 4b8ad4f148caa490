//! Client configuration.
//!
//! `ClientConfig` carries the public Supabase endpoint and anon key plus the
//! realtime timing knobs shared by the session managers. Secret credentials
//! (access tokens) are never stored here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_NOTES_TABLE: &str = "notes";

/// Timing and buffering for realtime sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RealtimeSettings {
    /// Quiet period before a content save fires
    pub save_debounce_ms: u64,
    /// How long a typing indicator stays lit without a follow-up event
    pub typing_timeout_ms: u64,
    /// Period of the sweep that clears expired typing indicators
    pub typing_sweep_ms: u64,
    /// Events buffered per channel subscriber
    pub channel_capacity: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            save_debounce_ms: 1000,
            typing_timeout_ms: 2000,
            typing_sweep_ms: 250,
            channel_capacity: 256,
        }
    }
}

impl RealtimeSettings {
    #[must_use]
    pub const fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    #[must_use]
    pub const fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    #[must_use]
    pub const fn typing_sweep(&self) -> Duration {
        Duration::from_millis(self.typing_sweep_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    #[serde(default = "default_notes_table")]
    pub notes_table: String,
    /// Write `last_edited_by` on saves; the stock `notes` table has no such column
    #[serde(default)]
    pub track_editor: bool,
    #[serde(default)]
    pub realtime: RealtimeSettings,
}

impl ClientConfig {
    /// Validate and normalize a config built from raw values.
    pub fn new(
        supabase_url: impl Into<String>,
        supabase_anon_key: impl Into<String>,
    ) -> Result<Self> {
        Self {
            supabase_url: supabase_url.into(),
            supabase_anon_key: supabase_anon_key.into(),
            notes_table: default_notes_table(),
            track_editor: false,
            realtime: RealtimeSettings::default(),
        }
        .normalized()
    }

    /// Read `SUPABASE_URL`, `SUPABASE_ANON_KEY` and the optional
    /// `QUILL_NOTES_TABLE` / `QUILL_TRACK_EDITOR`.
    pub fn from_env() -> Result<Self> {
        let url = normalize_text_option(std::env::var("SUPABASE_URL").ok())
            .ok_or_else(|| Error::InvalidConfiguration("SUPABASE_URL is not set".to_string()))?;
        let anon_key = normalize_text_option(std::env::var("SUPABASE_ANON_KEY").ok()).ok_or_else(
            || Error::InvalidConfiguration("SUPABASE_ANON_KEY is not set".to_string()),
        )?;

        let mut config = Self::new(url, anon_key)?;
        if let Some(table) = normalize_text_option(std::env::var("QUILL_NOTES_TABLE").ok()) {
            config.notes_table = table;
        }
        if let Some(flag) = normalize_text_option(std::env::var("QUILL_TRACK_EDITOR").ok()) {
            config.track_editor = parse_flag(&flag);
        }
        Ok(config)
    }

    /// Parse a JSON config document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidConfiguration(format!("invalid config JSON: {error}")))?;
        config.normalized()
    }

    /// `{supabase_url}/rest/v1`
    #[must_use]
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    fn normalized(mut self) -> Result<Self> {
        let url = normalize_text_option(Some(self.supabase_url)).ok_or_else(|| {
            Error::InvalidConfiguration("supabase_url must not be empty".to_string())
        })?;
        if !is_http_url(&url) {
            return Err(Error::InvalidConfiguration(
                "supabase_url must include http:// or https://".to_string(),
            ));
        }
        self.supabase_url = url.trim_end_matches('/').to_string();

        self.supabase_anon_key = normalize_text_option(Some(self.supabase_anon_key))
            .ok_or_else(|| {
                Error::InvalidConfiguration("supabase_anon_key must not be empty".to_string())
            })?;

        if self.notes_table.trim().is_empty() {
            self.notes_table = default_notes_table();
        }
        Ok(self)
    }
}

fn default_notes_table() -> String {
    DEFAULT_NOTES_TABLE.to_string()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
