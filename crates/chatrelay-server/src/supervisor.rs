//! Long-lived background tasks with an observable terminal state.
//!
//! [`spawn_supervised`] runs a fallible future on tokio and publishes how it
//! ended on a `watch` channel. There is no restart policy; observers decide
//! what a terminated task means for them.

use std::fmt::Display;
use std::future::Future;

use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskOutcome::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Running => "running",
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Handle to a supervised task. Cloning shares the same task.
#[derive(Debug, Clone)]
pub struct Supervised {
    name: &'static str,
    outcome: watch::Receiver<TaskOutcome>,
}

impl Supervised {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state without waiting.
    pub fn outcome(&self) -> TaskOutcome {
        self.outcome.borrow().clone()
    }

    /// Wait until the task has terminated.
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx = self.outcome.clone();
        // The supervisor always publishes a terminal state before dropping
        // the sender, so the last value is final even if the channel closed.
        let _ = rx.wait_for(TaskOutcome::is_terminal).await;
        let outcome = rx.borrow().clone();
        outcome
    }
}

pub fn spawn_supervised<F, E>(name: &'static str, task: F) -> Supervised
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = watch::channel(TaskOutcome::Running);
    let inner = tokio::spawn(task);

    tokio::spawn(async move {
        let outcome = match inner.await {
            Ok(Ok(())) => {
                info!(task = name, "Background task completed");
                TaskOutcome::Completed
            }
            Ok(Err(e)) => {
                error!(task = name, error = %e, "Background task failed");
                TaskOutcome::Failed(e.to_string())
            }
            Err(join) if join.is_panic() => {
                error!(task = name, "Background task panicked");
                TaskOutcome::Failed("task panicked".to_string())
            }
            Err(_) => {
                warn!(task = name, "Background task cancelled");
                TaskOutcome::Cancelled
            }
        };
        tx.send_replace(outcome);
    });

    Supervised { name, outcome: rx }
}
