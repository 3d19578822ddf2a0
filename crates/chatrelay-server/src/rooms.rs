//! Connected push-channel clients and the named rooms they belong to.
//!
//! Every client owns an unbounded outbound queue. Emitting never awaits the
//! client: events are queued under the registry lock, so an emission sees
//! either the membership before a join/leave or the one after it, never a
//! mix. A client that is gone at emission time simply misses the event.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload of a `my_response` acknowledgement. `data` is whatever JSON the
/// client sent, or a status string from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl Ack {
    pub fn new(data: impl Into<serde_json::Value>) -> Self {
        Self {
            data: data.into(),
            count: None,
        }
    }
}

/// Events pushed from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Wire-exact encoded upstream chat message.
    ChatMessage(Bytes),
    MyResponse(Ack),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every connected client, whatever rooms it is in.
    Broadcast,
    Room(String),
    Client(ClientId),
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, mpsc::UnboundedSender<ServerEvent>>,
    rooms: HashMap<String, HashSet<ClientId>>,
}

impl Inner {
    fn remove_member(&mut self, room: &str, client: &ClientId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(client);
        if members.is_empty() {
            self.rooms.remove(room);
            debug!(room, "Removed empty room");
        }
        removed
    }
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client and return its id and outbound queue.
    pub async fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        inner.clients.insert(id, tx);
        info!(client = %id, clients = inner.clients.len(), "Client connected");
        (id, rx)
    }

    /// Forget a client and drop it from every room.
    pub async fn disconnect(&self, client: &ClientId) {
        let mut inner = self.inner.write().await;
        if inner.clients.remove(client).is_none() {
            return;
        }
        let rooms: Vec<String> = inner
            .rooms
            .iter()
            .filter(|(_, members)| members.contains(client))
            .map(|(name, _)| name.clone())
            .collect();
        for room in rooms {
            inner.remove_member(&room, client);
        }
        info!(client = %client, clients = inner.clients.len(), "Client disconnected");
    }

    /// Add a client to a room, creating the room if needed.
    pub async fn join(&self, client: &ClientId, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(client) {
            return false;
        }
        let members = inner.rooms.entry(room.to_string()).or_default();
        members.insert(*client);
        debug!(client = %client, room, members = members.len(), "Joined room");
        true
    }

    pub async fn leave(&self, client: &ClientId, room: &str) -> bool {
        let removed = self.inner.write().await.remove_member(room, client);
        if removed {
            debug!(client = %client, room, "Left room");
        }
        removed
    }

    /// Remove a room and all of its memberships.
    pub async fn close_room(&self, room: &str) -> usize {
        let members = self.inner.write().await.rooms.remove(room);
        let count = members.map(|m| m.len()).unwrap_or(0);
        info!(room, members = count, "Closed room");
        count
    }

    /// Queue `event` for every client addressed by `target`.
    ///
    /// Returns the number of clients it was queued for.
    pub async fn emit(&self, target: &Target, event: ServerEvent) -> usize {
        let inner = self.inner.read().await;
        let send = |id: &ClientId| {
            inner
                .clients
                .get(id)
                .is_some_and(|tx| tx.send(event.clone()).is_ok())
        };

        match target {
            Target::Broadcast => inner.clients.keys().filter(|id| send(*id)).count(),
            Target::Room(room) => inner
                .rooms
                .get(room)
                .map(|members| members.iter().filter(|id| send(*id)).count())
                .unwrap_or(0),
            Target::Client(id) => usize::from(send(id)),
        }
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    #[cfg(test)]
    pub async fn room_members(&self, room: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}
