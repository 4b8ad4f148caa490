use std::path::Path;

use chrono::Utc;
use quill_core::search::{DateRange, SearchFiltersPatch, SearchResult, SearchStore};

use crate::cli::{Direction, SortKey};
use crate::commands::common::{
    format_relative_time, load_notes, note_title, parse_since, parse_until, render_tags, short_id,
};
use crate::error::CliError;

/// Options for `quill search`, straight from the command line
#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub query: String,
    pub tags: Vec<String>,
    pub folder: Option<String>,
    pub pinned: bool,
    pub archived: Option<bool>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub sort: SortKey,
    pub order: Direction,
    pub limit: usize,
}

impl SearchArgs {
    pub fn to_patch(&self) -> Result<SearchFiltersPatch, CliError> {
        let start = self.since.as_deref().map(parse_since).transpose()?;
        let end = self.until.as_deref().map(parse_until).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(CliError::EmptyDateRange(
                    start.date_naive().to_string(),
                    end.date_naive().to_string(),
                ));
            }
        }

        Ok(SearchFiltersPatch {
            query: Some(self.query.clone()),
            tags: Some(self.tags.clone()),
            date_range: Some(DateRange { start, end }),
            sort_by: Some(self.sort.into()),
            sort_order: Some(self.order.into()),
            folder_id: Some(self.folder.clone()),
            is_pinned: Some(self.pinned.then_some(true)),
            is_archived: Some(self.archived),
        })
    }
}

pub async fn run_search(
    args: &SearchArgs,
    as_json: bool,
    file: Option<&Path>,
) -> Result<(), CliError> {
    let patch = args.to_patch()?;
    let notes = load_notes(file).await?;

    let mut store = SearchStore::new();
    store.set_filters(patch);
    let results = store.search(&notes);
    let shown = &results[..results.len().min(args.limit)];

    if as_json {
        println!("{}", serde_json::to_string_pretty(shown)?);
    } else if shown.is_empty() {
        println!("No matching notes");
    } else {
        for line in format_result_lines(shown) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn format_result_lines(results: &[SearchResult]) -> Vec<String> {
    let now = Utc::now();
    results
        .iter()
        .map(|result| {
            let note = &result.note;
            let short_id = short_id(note);
            let score = result.relevance_score;
            let title = note_title(note, 40);
            let relative_time = format_relative_time(note.updated_at, now);
            let tags = render_tags(note);

            if tags.is_empty() {
                format!("{short_id:<13}  {score:>4}  {title:<40}  {relative_time}")
            } else {
                format!("{short_id:<13}  {score:>4}  {title:<40}  {relative_time:<10}  {tags}")
            }
        })
        .collect()
}
