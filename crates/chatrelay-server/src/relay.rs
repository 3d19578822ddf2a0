//! Relay from the upstream event stream to push-channel clients.
//!
//! The relay holds the process's only subscription to upstream events.
//! Starting it loads the directory (populating the cache), opens the
//! subscription and spawns the supervised relay loop; later calls to
//! [`EventRelay::start`] return the same task. Chat messages are encoded
//! with the wire-exact encoding and broadcast to every connected client in
//! upstream order. Other event kinds are observed and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use chatrelay_shared::serializer::encode_event;
use chatrelay_shared::{ConversationEvent, UpstreamError};
use chatrelay_upstream::{ChatBackend, EventStream};

use crate::cache::DomainCache;
use crate::error::FetchError;
use crate::rooms::{RoomRegistry, ServerEvent, Target};
use crate::supervisor::{spawn_supervised, Supervised};

pub struct EventRelay {
    backend: Arc<dyn ChatBackend>,
    cache: Arc<DomainCache>,
    rooms: RoomRegistry,
    heartbeat: Duration,
    task: OnceCell<Supervised>,
    forwarded: Arc<AtomicU64>,
}

impl EventRelay {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        cache: Arc<DomainCache>,
        rooms: RoomRegistry,
        heartbeat: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            rooms,
            heartbeat,
            task: OnceCell::new(),
            forwarded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start relaying. Idempotent: the subscription is opened once even if
    /// called repeatedly or concurrently. A failed directory fetch leaves
    /// the relay unstarted so a later call can retry.
    pub async fn start(&self) -> Result<&Supervised, FetchError> {
        self.task
            .get_or_try_init(|| async {
                let directory = self.cache.directory().await?;
                let users = directory.users();
                info!(count = users.len(), "Known users");
                for user in users.all() {
                    debug!(name = %user.full_name, id = %user.id, "Known user");
                }

                let events = self.backend.subscribe_events();
                info!("Subscribed to upstream events");

                Ok::<_, FetchError>(spawn_supervised(
                    "event-relay",
                    run(
                        events,
                        self.rooms.clone(),
                        self.heartbeat,
                        self.forwarded.clone(),
                    ),
                ))
            })
            .await
    }

    /// Keep calling [`EventRelay::start`] from a background task until it
    /// succeeds, waiting `retry` between attempts. Directory fetch failures
    /// are not fatal to the process; the relay just stays stopped until
    /// upstream answers.
    pub fn start_in_background(self: &Arc<Self>, retry: Duration) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut attempt = 1u32;
            loop {
                match relay.start().await {
                    Ok(task) => {
                        info!(task = task.name(), attempt, "Event relay running");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, retry = ?retry, "Event relay failed to start");
                        tokio::time::sleep(retry).await;
                        attempt += 1;
                    }
                }
            }
        })
    }

    /// The relay task, if started.
    pub fn task(&self) -> Option<&Supervised> {
        self.task.get()
    }

    /// Number of events broadcast so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }
}

async fn run(
    mut events: EventStream,
    rooms: RoomRegistry,
    heartbeat: Duration,
    forwarded: Arc<AtomicU64>,
) -> Result<(), UpstreamError> {
    let mut idle = tokio::time::interval(heartbeat);
    idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(event)) => {
                    if forward(&rooms, &event).await {
                        forwarded.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    info!("Upstream event stream ended");
                    return Ok(());
                }
            },
            _ = idle.tick() => trace!("Relay idle tick"),
        }
    }
}

/// Broadcast `event` if it is a chat message. Returns whether it was sent.
async fn forward(rooms: &RoomRegistry, event: &ConversationEvent) -> bool {
    if !event.is_chat_message() {
        debug!(event = ?event.event_id, kind = ?event.kind(), "Ignoring non-chat event");
        return false;
    }

    let payload = match encode_event(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(event = ?event.event_id, error = %e, "Dropping unencodable chat message");
            return false;
        }
    };

    let delivered = rooms
        .emit(&Target::Broadcast, ServerEvent::ChatMessage(payload))
        .await;
    debug!(
        event = ?event.event_id,
        conversation = ?event.conversation_id,
        at = ?event.timestamp_utc(),
        text = ?event.text(),
        delivered,
        "Forwarded chat message"
    );
    true
}
