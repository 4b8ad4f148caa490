use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use quill_core::search::{SortBy, SortOrder};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Search and list your Quill notes from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Read notes from a JSON export instead of Supabase
    #[arg(long, global = true, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search notes by text and filters
    #[command(alias = "find")]
    Search {
        /// Search query (empty matches every note)
        #[arg(default_value = "")]
        query: String,
        /// Only notes carrying this tag (repeatable)
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Only notes in this folder
        #[arg(long, value_name = "ID")]
        folder: Option<String>,
        /// Only pinned notes
        #[arg(long)]
        pinned: bool,
        /// Match archived (true) or active (false) notes
        #[arg(long, value_name = "BOOL")]
        archived: Option<bool>,
        /// Created on or after this date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        since: Option<String>,
        /// Created on or before this date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        until: Option<String>,
        /// Sort key
        #[arg(long, value_enum, default_value_t = SortKey::Relevance)]
        sort: SortKey,
        /// Sort direction
        #[arg(long, value_enum, default_value_t = Direction::Desc)]
        order: Direction,
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently updated notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Filter notes by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Include archived notes
        #[arg(long)]
        archived: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SortKey {
    Relevance,
    Created,
    Updated,
    Title,
    Words,
}

impl From<SortKey> for SortBy {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Relevance => Self::Relevance,
            SortKey::Created => Self::DateCreated,
            SortKey::Updated => Self::DateUpdated,
            SortKey::Title => Self::Title,
            SortKey::Words => Self::WordCount,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Direction {
    Asc,
    Desc,
}

impl From<Direction> for SortOrder {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Asc => Self::Asc,
            Direction::Desc => Self::Desc,
        }
    }
}
