//! Stateful search session: current filters, last results and query history.

use std::collections::VecDeque;

use super::{collect_tags, search_notes, SearchFilters, SearchFiltersPatch, SearchResult};
use crate::models::Note;

/// Most queries kept in history
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct SearchStore {
    filters: SearchFilters,
    results: Vec<SearchResult>,
    history: VecDeque<String>,
}

impl SearchStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn filters(&self) -> &SearchFilters {
        &self.filters
    }

    pub fn set_filters(&mut self, patch: SearchFiltersPatch) {
        self.filters.apply(patch);
    }

    pub fn reset_filters(&mut self) {
        self.filters = SearchFilters::default();
    }

    /// Run the current filters over `notes`, cache the results and record the query
    pub fn search(&mut self, notes: &[Note]) -> &[SearchResult] {
        self.results = search_notes(notes, &self.filters);
        let query = self.filters.query.trim().to_string();
        self.remember(query);
        tracing::debug!(
            "Search {:?} matched {} of {} notes",
            self.filters.query,
            self.results.len(),
            notes.len()
        );
        &self.results
    }

    /// Results of the last `search`
    #[must_use]
    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    /// Past queries, most recent first
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    #[must_use]
    pub fn collect_tags(notes: &[Note]) -> Vec<String> {
        collect_tags(notes)
    }

    fn remember(&mut self, query: String) {
        if query.is_empty() {
            return;
        }
        self.history.retain(|past| *past != query);
        self.history.push_front(query);
        self.history.truncate(HISTORY_LIMIT);
    }
}
