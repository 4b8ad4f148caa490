use std::path::Path;

use quill_core::search::{search_notes, SearchFilters, SortBy, SortOrder};
use quill_core::Note;

use crate::commands::common::{format_note_lines, load_notes, note_to_list_item, NoteListItem};
use crate::error::CliError;

/// Most recently updated first, archived notes hidden unless asked for
pub fn select_notes(
    notes: &[Note],
    limit: usize,
    tag: Option<&str>,
    include_archived: bool,
) -> Vec<Note> {
    let filters = SearchFilters {
        tags: tag.map(|tag| vec![tag.to_string()]).unwrap_or_default(),
        sort_by: SortBy::DateUpdated,
        sort_order: SortOrder::Desc,
        is_archived: (!include_archived).then_some(false),
        ..SearchFilters::default()
    };
    search_notes(notes, &filters)
        .into_iter()
        .take(limit)
        .map(|result| result.note)
        .collect()
}

pub async fn run_list(
    limit: usize,
    tag: Option<&str>,
    include_archived: bool,
    as_json: bool,
    file: Option<&Path>,
) -> Result<(), CliError> {
    let notes = load_notes(file).await?;
    let selected = select_notes(&notes, limit, tag, include_archived);

    if as_json {
        let json_items = selected
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&selected.iter().collect::<Vec<_>>()) {
            println!("{line}");
        }
    }

    Ok(())
}
