//! Realtime message bus abstraction.
//!
//! Session managers talk to a pub/sub backend through [`RealtimeTransport`]
//! and [`RealtimeChannel`]. A channel carries three event categories:
//! presence membership, fire-and-forget broadcasts, and row change feeds.
//!
//! ```text
//! RealtimeTransport::channel(topic)
//!       │
//!       ├── listen_row_changes(filter)   (before subscribe)
//!       ├── subscribe() ──► mpsc::Receiver<ChannelEvent>
//!       ├── track(presence) / untrack()
//!       ├── presence_state()
//!       ├── send(event, payload)
//!       └── unsubscribe()
//! ```

mod local;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::PresenceInfo;

pub use local::LocalBus;

/// Presence metas keyed by presence key
pub type PresenceState = HashMap<String, Vec<PresenceInfo>>;

/// Subscription lifecycle signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Membership changed; read `presence_state()` for the full map
    Sync,
    Join {
        key: String,
        new_presences: Vec<PresenceInfo>,
    },
    Leave {
        key: String,
        left_presences: Vec<PresenceInfo>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row event selector for a change feed; `All` is the `*` wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEvent {
    Insert,
    Update,
    Delete,
    All,
}

impl RowEvent {
    #[must_use]
    pub const fn accepts(self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (Self::All, _)
                | (Self::Insert, ChangeKind::Insert)
                | (Self::Update, ChangeKind::Update)
                | (Self::Delete, ChangeKind::Delete)
        )
    }
}

/// A database change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub table: String,
    pub kind: ChangeKind,
    /// Row after the change (insert/update)
    pub new: Option<Value>,
    /// Row before the change; for deletes at least the primary key
    pub old: Option<Value>,
}

impl RowChange {
    #[must_use]
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    #[must_use]
    pub fn update(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update,
            new: Some(row),
            old: None,
        }
    }

    #[must_use]
    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Decode the post-change row
    pub fn new_record<T: DeserializeOwned>(&self) -> Result<T> {
        let row = self
            .new
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("{:?} change has no new row", self.kind)))?;
        Ok(serde_json::from_value(row)?)
    }

    /// Decode the pre-change row
    pub fn old_record<T: DeserializeOwned>(&self) -> Result<T> {
        let row = self
            .old
            .clone()
            .ok_or_else(|| Error::InvalidInput(format!("{:?} change has no old row", self.kind)))?;
        Ok(serde_json::from_value(row)?)
    }

    /// Column value from whichever image the change carries
    fn column(&self, column: &str) -> Option<&Value> {
        self.new
            .as_ref()
            .and_then(|row| row.get(column))
            .or_else(|| self.old.as_ref().and_then(|row| row.get(column)))
    }
}

/// Table + event + optional `column=eq.value` predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub table: String,
    pub event: RowEvent,
    pub column: Option<String>,
    pub value: Option<String>,
}

impl RowFilter {
    #[must_use]
    pub fn new(table: impl Into<String>, event: RowEvent) -> Self {
        Self {
            table: table.into(),
            event,
            column: None,
            value: None,
        }
    }

    /// Restrict to rows where `column` equals `value`
    #[must_use]
    pub fn where_eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.column = Some(column.into());
        self.value = Some(value.to_string());
        self
    }

    /// Parse a PostgREST style predicate such as `user_id=eq.123`
    pub fn with_predicate(self, predicate: &str) -> Result<Self> {
        let (column, rest) = predicate
            .split_once('=')
            .ok_or_else(|| Error::InvalidInput(format!("invalid filter: {predicate}")))?;
        let value = rest.strip_prefix("eq.").ok_or_else(|| {
            Error::InvalidInput(format!("unsupported filter operator: {predicate}"))
        })?;
        if column.is_empty() {
            return Err(Error::InvalidInput(format!("invalid filter: {predicate}")));
        }
        Ok(self.where_eq(column, value))
    }

    #[must_use]
    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table != self.table || !self.event.accepts(change.kind) {
            return false;
        }
        let (Some(column), Some(expected)) = (&self.column, &self.value) else {
            return true;
        };
        match change.column(column) {
            Some(Value::String(actual)) => actual == expected,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == *expected,
        }
    }
}

/// Everything a subscribed channel delivers
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(ChannelStatus),
    Presence(PresenceEvent),
    Broadcast { event: String, payload: Value },
    RowChange(RowChange),
}

/// Factory for named channels
pub trait RealtimeTransport: Send + Sync {
    fn channel(&self, topic: &str) -> Arc<dyn RealtimeChannel>;
}

/// One named pub/sub channel
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn topic(&self) -> &str;

    /// Register a change feed; only effective before `subscribe`
    fn listen_row_changes(&self, filter: RowFilter);

    /// Join the channel. The first event delivered is a status signal.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChannelEvent>>;

    /// Announce (or replace) this member's presence payload
    async fn track(&self, presence: PresenceInfo) -> Result<()>;

    async fn untrack(&self) -> Result<()>;

    /// Snapshot of every member's presence
    async fn presence_state(&self) -> Result<PresenceState>;

    /// Fire-and-forget broadcast to the other members
    async fn send(&self, event: &str, payload: Value) -> Result<()>;

    /// Leave the channel; safe to call more than once
    async fn unsubscribe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_filter_matches_table_event_and_predicate() {
        let filter = RowFilter::new("notes", RowEvent::All)
            .with_predicate("user_id=eq.user-1")
            .unwrap();

        assert!(filter.matches(&RowChange::insert("notes", json!({ "user_id": "user-1" }))));
        assert!(filter.matches(&RowChange::delete("notes", json!({ "user_id": "user-1" }))));
        assert!(!filter.matches(&RowChange::insert("notes", json!({ "user_id": "user-2" }))));
        assert!(!filter.matches(&RowChange::insert("folders", json!({ "user_id": "user-1" }))));
    }

    #[test]
    fn row_filter_respects_event_kind() {
        let filter = RowFilter::new("notes", RowEvent::Update);
        assert!(filter.matches(&RowChange::update("notes", json!({}))));
        assert!(!filter.matches(&RowChange::insert("notes", json!({}))));
    }

    #[test]
    fn row_filter_compares_non_string_columns() {
        let filter = RowFilter::new("notes", RowEvent::All).where_eq("revision", 3);
        assert!(filter.matches(&RowChange::update("notes", json!({ "revision": 3 }))));
        assert!(!filter.matches(&RowChange::update("notes", json!({ "revision": null }))));
    }

    #[test]
    fn with_predicate_rejects_unsupported_operators() {
        let base = RowFilter::new("notes", RowEvent::All);
        assert!(base.clone().with_predicate("user_id=neq.1").is_err());
        assert!(base.clone().with_predicate("user_id").is_err());
        assert!(base.with_predicate("=eq.1").is_err());
    }

    #[test]
    fn new_record_reports_missing_image() {
        let change = RowChange::delete("notes", json!({ "id": "x" }));
        assert!(change.new_record::<Value>().is_err());
        assert_eq!(change.old_record::<Value>().unwrap(), json!({ "id": "x" }));
    }
}
