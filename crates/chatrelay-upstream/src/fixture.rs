//! Snapshot-backed implementation of [`ChatBackend`].
//!
//! Serves users, conversations and event history from an in-memory
//! [`Snapshot`] (optionally loaded from a JSON file) and lets callers inject
//! live events, which are appended to history and delivered to every open
//! subscription in injection order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use chatrelay_shared::{
    ConversationDirectory, ConversationEvent, ConversationId, EventId, UpstreamError,
    UserDirectory,
};

use crate::backend::{ChatBackend, EventStream};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recorded state of an upstream account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: UserDirectory,
    #[serde(default)]
    pub conversations: ConversationDirectory,
    /// Event history per conversation, oldest first.
    #[serde(default)]
    pub events: HashMap<ConversationId, Vec<ConversationEvent>>,
}

impl Snapshot {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let data = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

// ---------------------------------------------------------------------------
// Fixture backend
// ---------------------------------------------------------------------------

/// How [`FixtureBackend::connect`] behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Fire the connect observers, then run until [`FixtureBackend::close`].
    #[default]
    Succeed,
    /// Fail with the given cause before ever connecting.
    Fail(String),
    /// Return `Ok(())` without ever connecting.
    CloseBeforeReady,
}

type Subscriber = mpsc::UnboundedSender<Result<ConversationEvent, UpstreamError>>;

pub struct FixtureBackend {
    snapshot: Mutex<Snapshot>,
    connect_behavior: ConnectBehavior,
    connect_delay: Duration,
    fetch_delay: Duration,
    connected: AtomicBool,
    observers: Mutex<Vec<oneshot::Sender<()>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    subscriptions: AtomicUsize,
    directory_fetches: AtomicUsize,
    failing_fetches: AtomicUsize,
    closed: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FixtureBackend {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            connect_behavior: ConnectBehavior::default(),
            connect_delay: Duration::ZERO,
            fetch_delay: Duration::ZERO,
            connected: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            subscriptions: AtomicUsize::new(0),
            directory_fetches: AtomicUsize::new(0),
            failing_fetches: AtomicUsize::new(0),
            closed: watch::channel(false).0,
        }
    }

    /// Load a snapshot file, falling back to an empty snapshot when the
    /// file does not exist.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let snapshot = match Snapshot::load(path).await {
            Ok(snapshot) => snapshot,
            Err(SnapshotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Snapshot file not found, starting empty");
                Snapshot::default()
            }
            Err(e) => return Err(e),
        };
        info!(
            path = %path.display(),
            users = snapshot.users.len(),
            conversations = snapshot.conversations.len(),
            "Loaded upstream snapshot"
        );
        Ok(Self::new(snapshot))
    }

    pub fn with_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect_behavior = behavior;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Make the next `n` fetches (directory or events) fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Number of directory fetches served so far, failed ones included.
    pub fn directory_fetches(&self) -> usize {
        self.directory_fetches.load(Ordering::SeqCst)
    }

    /// Number of event subscriptions opened so far.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Record `event` in history and deliver it to every live subscription.
    ///
    /// Returns how many subscriptions received it.
    pub fn inject(&self, event: ConversationEvent) -> usize {
        if let Some(conversation) = event.conversation_id.clone() {
            lock(&self.snapshot)
                .events
                .entry(conversation)
                .or_default()
                .push(event.clone());
        }

        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        debug!(
            event = ?event.event_id,
            delivered = subscribers.len(),
            "Injected upstream event"
        );
        subscribers.len()
    }

    /// Break every open subscription with a stream error.
    pub fn fail_subscriptions(&self, cause: &str) {
        for tx in lock(&self.subscribers).drain(..) {
            let _ = tx.send(Err(UpstreamError::Stream(cause.to_string())));
        }
    }

    /// End the session: `connect` returns and all subscriptions end.
    pub fn close(&self) {
        self.closed.send_replace(true);
        lock(&self.subscribers).clear();
    }

    async fn begin_fetch(&self) -> Result<(), UpstreamError> {
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err(UpstreamError::Request("injected fetch failure".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl ChatBackend for FixtureBackend {
    async fn connect(&self) -> Result<(), UpstreamError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        match &self.connect_behavior {
            ConnectBehavior::Fail(cause) => {
                lock(&self.observers).clear();
                return Err(UpstreamError::Connection(cause.clone()));
            }
            ConnectBehavior::CloseBeforeReady => {
                lock(&self.observers).clear();
                return Ok(());
            }
            ConnectBehavior::Succeed => {}
        }

        self.connected.store(true, Ordering::SeqCst);
        for observer in lock(&self.observers).drain(..) {
            let _ = observer.send(());
        }
        info!("Fixture session connected");

        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;

        lock(&self.subscribers).clear();
        info!("Fixture session closed");
        Ok(())
    }

    fn on_connect(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.connected.load(Ordering::SeqCst) {
            let _ = tx.send(());
        } else {
            lock(&self.observers).push(tx);
        }
        rx
    }

    async fn build_user_conversation_list(
        &self,
    ) -> Result<(UserDirectory, ConversationDirectory), UpstreamError> {
        self.directory_fetches.fetch_add(1, Ordering::SeqCst);
        self.begin_fetch().await?;
        let snapshot = lock(&self.snapshot);
        Ok((snapshot.users.clone(), snapshot.conversations.clone()))
    }

    async fn get_events(
        &self,
        conversation: &ConversationId,
        window_start: Option<&EventId>,
        max_events: usize,
    ) -> Result<Vec<ConversationEvent>, UpstreamError> {
        self.begin_fetch().await?;
        let snapshot = lock(&self.snapshot);
        if !snapshot.conversations.contains(conversation) {
            return Err(UpstreamError::UnknownConversation(conversation.clone()));
        }

        let history = snapshot
            .events
            .get(conversation)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let end = match window_start {
            Some(start) => history
                .iter()
                .position(|e| e.event_id.as_ref() == Some(start))
                .ok_or_else(|| UpstreamError::UnknownEvent {
                    conversation: conversation.clone(),
                    event: start.to_string(),
                })?,
            None => history.len(),
        };
        let begin = end.saturating_sub(max_events);
        Ok(history[begin..end].to_vec())
    }

    fn subscribe_events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}
