//! Quill CLI - Command-line search over your notes
//!
//! Reads notes from a JSON export or straight from Supabase and runs them
//! through the same search engine the apps use.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::list::run_list;
use crate::commands::search::{run_search, SearchArgs};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let file = cli.file.as_deref();

    match cli.command {
        Commands::Search {
            query,
            tags,
            folder,
            pinned,
            archived,
            since,
            until,
            sort,
            order,
            limit,
            json,
        } => {
            let args = SearchArgs {
                query,
                tags,
                folder,
                pinned,
                archived,
                since,
                until,
                sort,
                order,
                limit,
            };
            run_search(&args, json, file).await?;
        }
        Commands::List {
            limit,
            tag,
            archived,
            json,
        } => run_list(limit, tag.as_deref(), archived, json, file).await?,
    }

    Ok(())
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "quill=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
