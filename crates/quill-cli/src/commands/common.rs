use std::env;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use quill_core::config::ClientConfig;
use quill_core::store::{NoteStore, RestNoteStore};
use quill_core::util::normalize_text_option;
use quill_core::Note;
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub relative_time: String,
    pub word_count: u32,
    pub tags: Vec<String>,
}

/// Notes from `file` when given, otherwise from Supabase REST
pub async fn load_notes(file: Option<&Path>) -> Result<Vec<Note>, CliError> {
    if let Some(path) = file {
        return read_notes_file(path);
    }

    let token = normalize_text_option(env::var("SUPABASE_ACCESS_TOKEN").ok());
    let user_id = normalize_text_option(env::var("QUILL_USER_ID").ok());
    let (Some(token), Some(user_id)) = (token, user_id) else {
        return Err(CliError::NotesSourceNotConfigured);
    };

    let config = ClientConfig::from_env()?;
    let store = RestNoteStore::new(&config, token)?;
    let notes = store.list_notes(&user_id).await?;
    tracing::debug!("Fetched {} notes from {}", notes.len(), config.supabase_url);
    Ok(notes)
}

/// Parse a JSON array of notes
pub fn read_notes_file(path: &Path) -> Result<Vec<Note>, CliError> {
    let payload = std::fs::read_to_string(path)?;
    let notes: Vec<Note> = serde_json::from_str(&payload)?;
    tracing::debug!("Read {} notes from {}", notes.len(), path.display());
    Ok(notes)
}

/// Start of `date` in UTC
pub fn parse_since(date: &str) -> Result<DateTime<Utc>, CliError> {
    Ok(parse_date(date)?.and_time(NaiveTime::MIN).and_utc())
}

/// Last instant of `date` in UTC
pub fn parse_until(date: &str) -> Result<DateTime<Utc>, CliError> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| CliError::InvalidDate(date.to_string()))?;
    Ok(parse_date(date)?.and_time(end_of_day).and_utc())
}

fn parse_date(date: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(date.to_string()))
}

pub fn format_note_lines(notes: &[&Note]) -> Vec<String> {
    let now = Utc::now();
    notes
        .iter()
        .map(|note| {
            let short_id = short_id(note);
            let title = note_title(note, 40);
            let relative_time = format_relative_time(note.updated_at, now);
            let tags = render_tags(note);

            if tags.is_empty() {
                format!("{short_id:<13}  {title:<40}  {relative_time}")
            } else {
                format!("{short_id:<13}  {title:<40}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    let mut tags = note.tags.clone();
    tags.sort();

    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        preview: note_preview(&note.content, 80),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, Utc::now()),
        word_count: note.word_count,
        tags,
    }
}

pub fn short_id(note: &Note) -> String {
    note.id.to_string().chars().take(13).collect()
}

/// Title, or the first content line for untitled notes
pub fn note_title(note: &Note, max_chars: usize) -> String {
    if note.title.trim().is_empty() {
        note_preview(&note.content, max_chars)
    } else {
        truncate(&collapse(&note.title), max_chars)
    }
}

pub fn note_preview(content: &str, max_chars: usize) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    truncate(&collapse(first_line), max_chars)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = text.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn render_tags(note: &Note) -> String {
    let mut tags = note.tags.clone();
    tags.sort();
    tags.into_iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now
        .signed_duration_since(timestamp)
        .num_milliseconds()
        .max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
