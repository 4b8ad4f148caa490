use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] quill_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Date range is empty: {0} is after {1}")]
    EmptyDateRange(String, String),
    #[error(
        "No notes source configured. Pass --file, or set SUPABASE_URL, SUPABASE_ANON_KEY, SUPABASE_ACCESS_TOKEN and QUILL_USER_ID."
    )]
    NotesSourceNotConfigured,
}
