//! In-process transport with room-per-topic fan-out.
//!
//! Each topic owns one `tokio::sync::broadcast` sender. Every subscribed
//! channel gets an independent receiver plus a forwarding task that drops
//! its own broadcasts and any row change its filters do not accept.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    ChannelEvent, ChannelStatus, PresenceEvent, PresenceState, RealtimeChannel, RealtimeTransport,
    RowChange, RowFilter,
};
use crate::error::{Error, Result};
use crate::models::PresenceInfo;

#[derive(Debug, Clone)]
struct Envelope {
    /// Sending member; `None` for server-originated events
    origin: Option<Uuid>,
    event: ChannelEvent,
}

struct Room {
    sender: broadcast::Sender<Envelope>,
    presences: PresenceState,
    members: usize,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            presences: HashMap::new(),
            members: 0,
        }
    }

    fn publish(&self, origin: Option<Uuid>, event: ChannelEvent) {
        // No receivers is not an error for a fire-and-forget bus.
        let _ = self.sender.send(Envelope { origin, event });
    }
}

/// Shared in-memory pub/sub hub
#[derive(Clone)]
pub struct LocalBus {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
    capacity: usize,
}

impl LocalBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Deliver a database change to every room; channel filters decide who sees it
    pub fn emit_row_change(&self, change: &RowChange) {
        let rooms = self.rooms.lock();
        for room in rooms.values() {
            room.publish(None, ChannelEvent::RowChange(change.clone()));
        }
    }

    /// Number of subscribed members on `topic`
    #[must_use]
    pub fn member_count(&self, topic: &str) -> usize {
        self.rooms.lock().get(topic).map_or(0, |room| room.members)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(crate::config::RealtimeSettings::default().channel_capacity)
    }
}

impl RealtimeTransport for LocalBus {
    fn channel(&self, topic: &str) -> Arc<dyn RealtimeChannel> {
        Arc::new(LocalChannel {
            topic: topic.to_string(),
            member: Uuid::new_v4(),
            bus: self.clone(),
            filters: Mutex::new(Vec::new()),
            forwarder: Mutex::new(None),
        })
    }
}

struct LocalChannel {
    topic: String,
    member: Uuid,
    bus: LocalBus,
    filters: Mutex<Vec<RowFilter>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl LocalChannel {
    fn presence_key(&self) -> String {
        self.member.to_string()
    }

    fn is_subscribed(&self) -> bool {
        self.forwarder.lock().is_some()
    }

    fn ensure_subscribed(&self) -> Result<()> {
        if self.is_subscribed() {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "channel '{}' is not subscribed",
                self.topic
            )))
        }
    }

    fn with_room<T>(&self, action: impl FnOnce(&mut Room) -> T) -> Result<T> {
        let mut rooms = self.bus.rooms.lock();
        let room = rooms
            .get_mut(&self.topic)
            .ok_or_else(|| Error::Transport(format!("channel '{}' has no room", self.topic)))?;
        Ok(action(room))
    }

    /// Drop this member's presence, announcing the leave
    fn remove_presence(&self, room: &mut Room) {
        let key = self.presence_key();
        if let Some(left_presences) = room.presences.remove(&key) {
            room.publish(
                Some(self.member),
                ChannelEvent::Presence(PresenceEvent::Leave {
                    key,
                    left_presences,
                }),
            );
            room.publish(Some(self.member), ChannelEvent::Presence(PresenceEvent::Sync));
        }
    }

    /// Synchronous teardown shared by `unsubscribe` and `Drop`
    fn leave(&self) {
        let Some(forwarder) = self.forwarder.lock().take() else {
            return;
        };
        forwarder.abort();

        let mut rooms = self.bus.rooms.lock();
        let Some(room) = rooms.get_mut(&self.topic) else {
            return;
        };
        self.remove_presence(room);
        room.members = room.members.saturating_sub(1);
        if room.members == 0 {
            rooms.remove(&self.topic);
        }
        tracing::debug!("Left local channel {}", self.topic);
    }
}

fn accepts(member: Uuid, filters: &[RowFilter], envelope: &Envelope) -> bool {
    match &envelope.event {
        ChannelEvent::Broadcast { .. } => envelope.origin != Some(member),
        ChannelEvent::RowChange(change) => filters.iter().any(|filter| filter.matches(change)),
        ChannelEvent::Status(_) | ChannelEvent::Presence(_) => true,
    }
}

#[async_trait]
impl RealtimeChannel for LocalChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn listen_row_changes(&self, filter: RowFilter) {
        if self.is_subscribed() {
            tracing::warn!(
                "Ignoring row filter on already subscribed channel {}",
                self.topic
            );
            return;
        }
        self.filters.lock().push(filter);
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ChannelEvent>> {
        let mut forwarder_slot = self.forwarder.lock();
        if forwarder_slot.is_some() {
            return Err(Error::Transport(format!(
                "channel '{}' is already subscribed",
                self.topic
            )));
        }

        let mut receiver = {
            let mut rooms = self.bus.rooms.lock();
            let room = rooms
                .entry(self.topic.clone())
                .or_insert_with(|| Room::new(self.bus.capacity));
            room.members += 1;
            room.sender.subscribe()
        };

        let (events, rx) = mpsc::channel(self.bus.capacity);
        // Fresh channel with spare capacity; cannot fail.
        let _ = events.try_send(ChannelEvent::Status(ChannelStatus::Subscribed));

        let member = self.member;
        let filters = self.filters.lock().clone();
        let topic = self.topic.clone();
        *forwarder_slot = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => {
                        if !accepts(member, &filters, &envelope) {
                            continue;
                        }
                        if events.send(envelope.event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Channel {} lagged, dropped {} events", topic, skipped);
                    }
                    Err(RecvError::Closed) => {
                        let _ = events.send(ChannelEvent::Status(ChannelStatus::Closed)).await;
                        break;
                    }
                }
            }
        }));

        tracing::debug!("Subscribed to local channel {}", self.topic);
        Ok(rx)
    }

    async fn track(&self, presence: PresenceInfo) -> Result<()> {
        self.ensure_subscribed()?;
        let key = self.presence_key();
        let member = self.member;
        self.with_room(|room| {
            room.presences.insert(key.clone(), vec![presence.clone()]);
            room.publish(
                Some(member),
                ChannelEvent::Presence(PresenceEvent::Join {
                    key,
                    new_presences: vec![presence],
                }),
            );
            room.publish(Some(member), ChannelEvent::Presence(PresenceEvent::Sync));
        })
    }

    async fn untrack(&self) -> Result<()> {
        self.ensure_subscribed()?;
        self.with_room(|room| self.remove_presence(room))
    }

    async fn presence_state(&self) -> Result<PresenceState> {
        self.ensure_subscribed()?;
        self.with_room(|room| room.presences.clone())
    }

    async fn send(&self, event: &str, payload: Value) -> Result<()> {
        self.ensure_subscribed()?;
        let member = self.member;
        self.with_room(|room| {
            room.publish(
                Some(member),
                ChannelEvent::Broadcast {
                    event: event.to_string(),
                    payload,
                },
            );
        })
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.leave();
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.leave();
    }
}
