use thiserror::Error;

use crate::types::ConversationId;

/// Failures reported by the upstream chat backend.
///
/// Cloneable so that one failed fetch can be handed to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Session closed")]
    Closed,

    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    #[error("Unknown event in conversation {conversation}: {event}")]
    UnknownEvent {
        conversation: ConversationId,
        event: String,
    },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Event stream error: {0}")]
    Stream(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// An identifier or timestamp the wire format requires is absent.
    #[error("Event is missing required field `{0}`")]
    MissingField(&'static str),

    /// An event in a conversation window belongs to another conversation.
    #[error("Event {event} belongs to conversation {found}, expected {expected}")]
    ForeignEvent {
        event: String,
        expected: ConversationId,
        found: ConversationId,
    },
}
