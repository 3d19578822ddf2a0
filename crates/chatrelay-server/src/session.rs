//! Upstream session lifecycle.
//!
//! [`SessionManager::start`] launches the upstream connection as a
//! supervised task and returns immediately. Readiness can be reported two
//! ways: the backend's connect observer fires, or the connection task
//! terminates (successfully or not) without it. A tracker task watches both
//! and is the only writer of [`SessionState`].

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use chatrelay_upstream::ChatBackend;

use crate::error::ConnectionError;
use crate::supervisor::{spawn_supervised, Supervised, TaskOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Failed(String),
    Closed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Failed(_) => "failed",
            SessionState::Closed => "closed",
        }
    }
}

pub struct SessionManager {
    state: watch::Receiver<SessionState>,
    connection: Supervised,
}

impl SessionManager {
    /// Begin connecting to the upstream session in the background.
    pub fn start(backend: Arc<dyn ChatBackend>) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        // Register before connecting so the signal cannot be missed.
        let on_connect = backend.on_connect();
        let connection = spawn_supervised("upstream-connection", async move {
            backend.connect().await
        });

        tokio::spawn(track_state(state_tx, on_connect, connection.clone()));
        info!("Connecting to upstream session");

        Self {
            state: state_rx,
            connection,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn connection(&self) -> &Supervised {
        &self.connection
    }

    /// Wait until the session is ready or the connection task has ended.
    pub async fn await_ready(&self) -> Result<(), ConnectionError> {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s != SessionState::Connecting).await;
        let state = rx.borrow().clone();
        match state {
            SessionState::Ready => Ok(()),
            SessionState::Failed(cause) => Err(ConnectionError::Failed(cause)),
            SessionState::Closed | SessionState::Connecting => Err(ConnectionError::Closed),
        }
    }
}

async fn track_state(
    state: watch::Sender<SessionState>,
    on_connect: oneshot::Receiver<()>,
    connection: Supervised,
) {
    tokio::select! {
        biased;
        outcome = connection.wait() => {
            publish_terminal(&state, outcome);
            return;
        }
        signal = on_connect => {
            if signal.is_ok() {
                info!("Upstream session ready");
                state.send_replace(SessionState::Ready);
            }
        }
    }

    let outcome = connection.wait().await;
    publish_terminal(&state, outcome);
}

fn publish_terminal(state: &watch::Sender<SessionState>, outcome: TaskOutcome) {
    let next = match outcome {
        TaskOutcome::Failed(cause) => {
            warn!(cause = %cause, "Upstream session failed");
            SessionState::Failed(cause)
        }
        _ => {
            info!("Upstream session closed");
            SessionState::Closed
        }
    };
    state.send_replace(next);
}
