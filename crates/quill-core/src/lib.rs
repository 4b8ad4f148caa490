//! quill-core - Core library for Quill
//!
//! This crate contains the shared models, realtime session managers, note
//! persistence and search engine used by Quill clients (CLI and apps).

pub mod auth;
pub mod bus;
pub mod collab;
pub mod config;
pub mod error;
pub mod models;
pub mod presence;
pub mod realtime;
pub mod search;
pub mod store;
pub mod util;

pub use error::{Error, Result};
pub use models::{Note, NoteId};
