//! # chatrelay-shared
//!
//! Types shared by the upstream boundary and the relay server: the domain
//! model (users, conversations, events), the native wire messages of the
//! upstream protocol, and the serializer that turns one into the other.

pub mod constants;
pub mod error;
pub mod event;
pub mod serializer;
pub mod types;
pub mod wire;

pub use error::{SerializationError, UpstreamError};
pub use event::{ChatMessage, ConversationEvent, EventKind, EventPayload, HangoutEvent, Segment};
pub use types::{
    ConversationDirectory, ConversationId, ConversationSummary, EventId, User, UserDirectory,
    UserId,
};
