use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

use chatrelay_shared::{
    ConversationDirectory, ConversationEvent, ConversationId, EventId, UpstreamError,
    UserDirectory,
};

/// One subscription to the upstream conversation event stream.
///
/// Items arrive in the order the upstream session produced them. The stream
/// ends when the session closes; an `Err` item means the subscription broke.
pub type EventStream = BoxStream<'static, Result<ConversationEvent, UpstreamError>>;

/// Operations the relay consumes from the upstream chat session.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Drive the session's protocol I/O.
    ///
    /// Resolves with `Ok(())` when the session ends normally and with an
    /// error if it fails, before or after becoming ready.
    async fn connect(&self) -> Result<(), UpstreamError>;

    /// Register an observer fired once the session is usable.
    ///
    /// The receiver errors out if the session goes away without ever
    /// connecting.
    fn on_connect(&self) -> oneshot::Receiver<()>;

    /// Fetch the full user and conversation directories (archived
    /// conversations included).
    async fn build_user_conversation_list(
        &self,
    ) -> Result<(UserDirectory, ConversationDirectory), UpstreamError>;

    /// Fetch up to `max_events` events of a conversation, oldest first.
    ///
    /// With `window_start`, only events strictly older than that event are
    /// returned; without it, the most recent ones.
    async fn get_events(
        &self,
        conversation: &ConversationId,
        window_start: Option<&EventId>,
        max_events: usize,
    ) -> Result<Vec<ConversationEvent>, UpstreamError>;

    /// Open a new subscription to the conversation event stream.
    fn subscribe_events(&self) -> EventStream;
}
