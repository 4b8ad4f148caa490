//! Client-side search over an in-memory note collection.
//!
//! [`search_notes`] is a pure function of the notes and a [`SearchFilters`]:
//! filter, score, highlight, then sort. [`SearchStore`] layers the mutable
//! filter state, cached results and query history on top.

mod store;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::models::Note;

pub use store::{SearchStore, HISTORY_LIMIT};

/// Characters of content kept in a highlight preview
pub const PREVIEW_CHARS: usize = 200;
pub const HIGHLIGHT_OPEN: &str = "<mark>";
pub const HIGHLIGHT_CLOSE: &str = "</mark>";

const TITLE_MATCH_SCORE: u32 = 10;
const CONTENT_MATCH_SCORE: u32 = 2;
const TAG_MATCH_SCORE: u32 = 5;
const EXACT_TITLE_SCORE: u32 = 20;
const PINNED_SCORE: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    DateCreated,
    DateUpdated,
    Title,
    WordCount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Inclusive `created_at` window; a missing bound is open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub query: String,
    /// A note must carry every one of these
    pub tags: Vec<String>,
    pub date_range: DateRange,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub folder_id: Option<String>,
    pub is_pinned: Option<bool>,
    pub is_archived: Option<bool>,
}

/// Partial update for [`SearchFilters`]; `None` leaves a field alone.
///
/// The optional filters nest: `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchFiltersPatch {
    pub query: Option<String>,
    pub tags: Option<Vec<String>>,
    pub date_range: Option<DateRange>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
    pub folder_id: Option<Option<String>>,
    pub is_pinned: Option<Option<bool>>,
    pub is_archived: Option<Option<bool>>,
}

impl SearchFilters {
    /// Shallow merge: every field the patch sets replaces the current one
    pub fn apply(&mut self, patch: SearchFiltersPatch) {
        if let Some(query) = patch.query {
            self.query = query;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(date_range) = patch.date_range {
            self.date_range = date_range;
        }
        if let Some(sort_by) = patch.sort_by {
            self.sort_by = sort_by;
        }
        if let Some(sort_order) = patch.sort_order {
            self.sort_order = sort_order;
        }
        if let Some(folder_id) = patch.folder_id {
            self.folder_id = folder_id;
        }
        if let Some(is_pinned) = patch.is_pinned {
            self.is_pinned = is_pinned;
        }
        if let Some(is_archived) = patch.is_archived {
            self.is_archived = is_archived;
        }
    }

    /// Trimmed, lowercased query; `None` when blank
    fn normalized_query(&self) -> Option<String> {
        let query = self.query.trim();
        (!query.is_empty()).then(|| query.to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedField {
    Title,
    Content,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Highlights {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub note: Note,
    pub relevance_score: u32,
    pub matched_fields: Vec<MatchedField>,
    pub highlights: Highlights,
}

/// Filter, rank and sort `notes` under `filters`
#[must_use]
pub fn search_notes(notes: &[Note], filters: &SearchFilters) -> Vec<SearchResult> {
    let query = filters.normalized_query();
    let pattern = query.as_deref().and_then(query_pattern);

    let mut results = notes
        .iter()
        .filter(|note| passes_filters(note, filters, query.as_deref()))
        .map(|note| build_result(note, query.as_deref(), pattern.as_ref()))
        .collect::<Vec<_>>();

    sort_results(&mut results, filters.sort_by, filters.sort_order);
    results
}

fn passes_filters(note: &Note, filters: &SearchFilters, query: Option<&str>) -> bool {
    if let Some(query) = query {
        if matched_fields(note, query).is_empty() {
            return false;
        }
    }
    if !filters.tags.iter().all(|tag| note.tags.contains(tag)) {
        return false;
    }
    if !filters.date_range.contains(note.created_at) {
        return false;
    }
    if let Some(folder_id) = &filters.folder_id {
        if note.folder_id.as_ref() != Some(folder_id) {
            return false;
        }
    }
    if filters.is_pinned.is_some_and(|pinned| note.is_pinned != pinned) {
        return false;
    }
    if filters
        .is_archived
        .is_some_and(|archived| note.is_archived != archived)
    {
        return false;
    }
    true
}

fn matched_fields(note: &Note, query: &str) -> Vec<MatchedField> {
    let mut fields = Vec::new();
    if note.title.to_lowercase().contains(query) {
        fields.push(MatchedField::Title);
    }
    if note.content.to_lowercase().contains(query) {
        fields.push(MatchedField::Content);
    }
    if note
        .tags
        .iter()
        .any(|tag| tag.to_lowercase().contains(query))
    {
        fields.push(MatchedField::Tags);
    }
    fields
}

/// Case-insensitive literal matcher for the query
fn query_pattern(query: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .map_err(|error| tracing::warn!("Unusable search pattern {:?}: {}", query, error))
        .ok()
}

fn build_result(note: &Note, query: Option<&str>, pattern: Option<&Regex>) -> SearchResult {
    let (relevance_score, matched_fields) = match query {
        Some(query) => (score(note, query, pattern), matched_fields(note, query)),
        None => (0, Vec::new()),
    };
    SearchResult {
        note: note.clone(),
        relevance_score,
        matched_fields,
        highlights: highlights(note, pattern),
    }
}

fn score(note: &Note, query: &str, pattern: Option<&Regex>) -> u32 {
    let title = note.title.to_lowercase();
    let mut score = 0;

    if title.contains(query) {
        score += TITLE_MATCH_SCORE;
    }
    if let Some(pattern) = pattern {
        let occurrences =
            u32::try_from(pattern.find_iter(&note.content).count()).unwrap_or(u32::MAX);
        score += occurrences.saturating_mul(CONTENT_MATCH_SCORE);
    }
    let tag_hits = note
        .tags
        .iter()
        .filter(|tag| tag.to_lowercase().contains(query))
        .count();
    score += u32::try_from(tag_hits).unwrap_or(u32::MAX).saturating_mul(TAG_MATCH_SCORE);
    if title == query {
        score += EXACT_TITLE_SCORE;
    }
    if note.is_pinned {
        score += PINNED_SCORE;
    }
    score
}

fn highlights(note: &Note, pattern: Option<&Regex>) -> Highlights {
    let preview = content_preview(&note.content);
    match pattern {
        Some(pattern) => Highlights {
            title: mark(pattern, &note.title),
            content: mark(pattern, &preview),
        },
        None => Highlights {
            title: note.title.clone(),
            content: preview,
        },
    }
}

/// First [`PREVIEW_CHARS`] characters, with an ellipsis when cut
fn content_preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

fn mark(pattern: &Regex, text: &str) -> String {
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("{HIGHLIGHT_OPEN}{}{HIGHLIGHT_CLOSE}", &caps[0])
        })
        .into_owned()
}

fn sort_results(results: &mut [SearchResult], sort_by: SortBy, order: SortOrder) {
    results.sort_by(|a, b| {
        let ordering = compare(a, b, sort_by);
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn compare(a: &SearchResult, b: &SearchResult, sort_by: SortBy) -> Ordering {
    match sort_by {
        SortBy::Relevance => a.relevance_score.cmp(&b.relevance_score),
        SortBy::DateCreated => a.note.created_at.cmp(&b.note.created_at),
        SortBy::DateUpdated => a.note.updated_at.cmp(&b.note.updated_at),
        SortBy::Title => a
            .note
            .title
            .to_lowercase()
            .cmp(&b.note.title.to_lowercase())
            .then_with(|| a.note.title.cmp(&b.note.title)),
        SortBy::WordCount => a.note.word_count.cmp(&b.note.word_count),
    }
}

/// Distinct tags across `notes`, sorted
#[must_use]
pub fn collect_tags(notes: &[Note]) -> Vec<String> {
    let mut tags = notes
        .iter()
        .flat_map(|note| note.tags.iter().cloned())
        .collect::<Vec<_>>();
    tags.sort();
    tags.dedup();
    tags
}
