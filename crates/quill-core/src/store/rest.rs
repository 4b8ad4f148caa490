//! PostgREST-backed `NoteStore` (Supabase `/rest/v1`).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{NoteStore, NoteUpdate};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{Note, NoteId};

#[derive(Clone)]
pub struct RestNoteStore {
    table_url: String,
    anon_key: String,
    access_token: String,
    track_editor: bool,
    client: Client,
}

impl RestNoteStore {
    /// Store acting on behalf of the user who owns `access_token`
    pub fn new(config: &ClientConfig, access_token: impl Into<String>) -> Result<Self> {
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(Error::InvalidConfiguration(
                "access token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            table_url: format!("{}/{}", config.rest_url(), config.notes_table),
            anon_key: config.supabase_anon_key.clone(),
            access_token,
            track_editor: config.track_editor,
            client: Client::builder().build()?,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
    }

    /// PATCH body for `update`, without columns the table does not have
    fn patch_body(&self, mut update: NoteUpdate) -> NoteUpdate {
        if !self.track_editor {
            update.last_edited_by = None;
        }
        update
    }

    async fn rows(response: Response) -> Result<Vec<Note>> {
        let response = Self::check(response).await?;
        Ok(response.json::<Vec<Note>>().await?)
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Api(parse_api_error(status, &body)))
    }
}

#[async_trait]
impl NoteStore for RestNoteStore {
    async fn fetch_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let request = self.authorized(
            self.client
                .get(&self.table_url)
                .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())]),
        );
        let rows = Self::rows(request.send().await?).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>> {
        let request = self.authorized(self.client.get(&self.table_url).query(&[
            ("user_id", format!("eq.{user_id}")),
            ("select", "*".to_string()),
            ("order", "updated_at.desc".to_string()),
        ]));
        Self::rows(request.send().await?).await
    }

    async fn insert_note(&self, note: &Note) -> Result<Note> {
        let request = self.authorized(
            self.client
                .post(&self.table_url)
                .header("Prefer", "return=representation")
                .json(note),
        );
        Self::rows(request.send().await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Api("insert returned no row".to_string()))
    }

    async fn update_note(&self, id: &NoteId, update: NoteUpdate) -> Result<Note> {
        let request = self.authorized(
            self.client
                .patch(&self.table_url)
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(&self.patch_body(update)),
        );
        Self::rows(request.send().await?)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn delete_note(&self, id: &NoteId) -> Result<()> {
        let request = self.authorized(
            self.client
                .delete(&self.table_url)
                .query(&[("id", format!("eq.{id}"))]),
        );
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorResponse {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
    error: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.error)
            .or(payload.details)
            .or(payload.hint)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", crate::util::compact_text(trimmed), status.as_u16())
    }
}
