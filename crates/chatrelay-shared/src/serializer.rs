//! Transport encodings for domain objects.
//!
//! Two independent, pure encodings:
//!
//! - **Directory encoding**: borrowed JSON views of users and conversation
//!   summaries for the listing endpoints.
//! - **Wire-exact encoding**: protobuf payloads in the upstream protocol's
//!   own container format ([`crate::wire`]). Every field is copied from the
//!   event being encoded. Identifiers are never taken from the request that
//!   fetched the event.

use bytes::Bytes;
use prost::Message;
use serde::Serialize;

use crate::error::SerializationError;
use crate::event::{
    ChatMessage, ConversationEvent, EventPayload, Formatting, HangoutEvent, Segment, SegmentKind,
};
use crate::types::{
    ConversationDirectory, ConversationId, ConversationSummary, EventId, User, UserDirectory,
    UserId,
};
use crate::wire;

// ---------------------------------------------------------------------------
// Directory encoding
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView<'a> {
    pub id: &'a UserId,
    pub full_name: &'a str,
    pub first_name: &'a str,
    pub photo_url: Option<&'a str>,
    pub emails: &'a [String],
    pub is_self: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView<'a> {
    pub id: &'a ConversationId,
    pub name: Option<&'a str>,
    pub participant_ids: &'a [UserId],
    /// Participants resolved against the user directory; unknown ids are
    /// skipped.
    pub users: Vec<UserView<'a>>,
    pub last_modified: u64,
}

pub fn encode_user(user: &User) -> UserView<'_> {
    UserView {
        id: &user.id,
        full_name: &user.full_name,
        first_name: &user.first_name,
        photo_url: user.photo_url.as_deref(),
        emails: &user.emails,
        is_self: user.is_self,
    }
}

pub fn encode_users(users: &UserDirectory) -> Vec<UserView<'_>> {
    users.all().iter().map(encode_user).collect()
}

pub fn encode_conversation_summary<'a>(
    conversation: &'a ConversationSummary,
    users: &'a UserDirectory,
) -> ConversationView<'a> {
    ConversationView {
        id: &conversation.id,
        name: conversation.name.as_deref(),
        participant_ids: &conversation.participant_ids,
        users: conversation
            .participant_ids
            .iter()
            .filter_map(|id| users.get(id))
            .map(encode_user)
            .collect(),
        last_modified: conversation.last_modified,
    }
}

/// Every conversation, archived ones included, in directory order.
pub fn encode_conversation_summaries<'a>(
    conversations: &'a ConversationDirectory,
    users: &'a UserDirectory,
) -> Vec<ConversationView<'a>> {
    conversations
        .all(true)
        .map(|conv| encode_conversation_summary(conv, users))
        .collect()
}

// ---------------------------------------------------------------------------
// Wire-exact encoding
// ---------------------------------------------------------------------------

fn participant_id(id: &UserId) -> wire::ParticipantId {
    wire::ParticipantId {
        gaia_id: Some(id.gaia_id.clone()),
        chat_id: Some(id.chat_id.clone()),
    }
}

fn formatting(f: &Formatting) -> wire::Formatting {
    wire::Formatting {
        bold: f.bold,
        italic: f.italic,
        strikethrough: f.strikethrough,
        underline: f.underline,
    }
}

fn segment_type(kind: SegmentKind) -> wire::SegmentType {
    match kind {
        SegmentKind::Text => wire::SegmentType::Text,
        SegmentKind::LineBreak => wire::SegmentType::LineBreak,
        SegmentKind::Link => wire::SegmentType::Link,
    }
}

fn chat_message(msg: &ChatMessage) -> wire::ChatMessage {
    let segment = msg
        .segments
        .iter()
        .map(|seg| wire::Segment {
            r#type: segment_type(seg.kind) as i32,
            text: seg.text.clone(),
            formatting: seg.formatting.as_ref().map(formatting),
            link_data: seg.link_target.as_ref().map(|target| wire::LinkData {
                link_target: Some(target.clone()),
            }),
        })
        .collect();

    wire::ChatMessage {
        message_content: Some(wire::MessageContent { segment }),
    }
}

/// Build a fresh wire event from `event`, field by field.
///
/// Optional fields are copied as they are; nothing is derived from the
/// payload or filled with a default. Fails if the event id, conversation
/// id, sender id or timestamp is missing.
pub fn reencode_event(event: &ConversationEvent) -> Result<wire::Event, SerializationError> {
    let event_id = event
        .event_id
        .as_ref()
        .ok_or(SerializationError::MissingField("event_id"))?;
    let conversation_id = event
        .conversation_id
        .as_ref()
        .ok_or(SerializationError::MissingField("conversation_id"))?;
    let sender_id = event
        .sender_id
        .as_ref()
        .ok_or(SerializationError::MissingField("sender_id"))?;
    let timestamp = event
        .timestamp
        .ok_or(SerializationError::MissingField("timestamp"))?;

    let mut out = wire::Event {
        conversation_id: Some(wire::ConversationId {
            id: Some(conversation_id.0.clone()),
        }),
        sender_id: Some(participant_id(sender_id)),
        timestamp: Some(timestamp),
        source_type: event.source_type,
        event_id: Some(event_id.0.clone()),
        event_type: event.event_type,
        ..wire::Event::default()
    };

    match &event.payload {
        EventPayload::ChatMessage(msg) => out.chat_message = Some(chat_message(msg)),
        EventPayload::Hangout(hangout) => {
            out.hangout_event = Some(wire::HangoutEvent {
                event_type: hangout.event_type,
                participant_id: hangout.participant_ids.iter().map(participant_id).collect(),
                hangout_duration_secs: hangout.duration_secs,
            });
        }
        EventPayload::Other => {}
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

fn user_id(id: &wire::ParticipantId) -> UserId {
    UserId::new(
        id.chat_id.clone().unwrap_or_default(),
        id.gaia_id.clone().unwrap_or_default(),
    )
}

fn segment_kind(raw: i32) -> SegmentKind {
    match wire::SegmentType::try_from(raw) {
        Ok(wire::SegmentType::LineBreak) => SegmentKind::LineBreak,
        Ok(wire::SegmentType::Link) => SegmentKind::Link,
        _ => SegmentKind::Text,
    }
}

/// Convert a decoded wire event into the domain model.
///
/// For every field the domain model carries this is the inverse of
/// [`reencode_event`].
pub fn decode_event(event: &wire::Event) -> ConversationEvent {
    let payload = if let Some(msg) = &event.chat_message {
        let segments = msg
            .message_content
            .iter()
            .flat_map(|content| &content.segment)
            .map(|seg| Segment {
                kind: segment_kind(seg.r#type),
                text: seg.text.clone(),
                formatting: seg.formatting.as_ref().map(|f| Formatting {
                    bold: f.bold,
                    italic: f.italic,
                    strikethrough: f.strikethrough,
                    underline: f.underline,
                }),
                link_target: seg.link_data.as_ref().and_then(|l| l.link_target.clone()),
            })
            .collect();
        EventPayload::ChatMessage(ChatMessage { segments })
    } else if let Some(hangout) = &event.hangout_event {
        EventPayload::Hangout(HangoutEvent {
            event_type: hangout.event_type,
            participant_ids: hangout.participant_id.iter().map(user_id).collect(),
            duration_secs: hangout.hangout_duration_secs,
        })
    } else {
        EventPayload::Other
    };

    ConversationEvent {
        event_id: event.event_id.clone().map(EventId),
        conversation_id: event
            .conversation_id
            .as_ref()
            .and_then(|c| c.id.clone())
            .map(ConversationId),
        sender_id: event.sender_id.as_ref().map(user_id),
        timestamp: event.timestamp,
        source_type: event.source_type,
        event_type: event.event_type,
        payload,
    }
}

/// Encode a single event as a standalone wire `Event`.
pub fn encode_event(event: &ConversationEvent) -> Result<Bytes, SerializationError> {
    Ok(Bytes::from(reencode_event(event)?.encode_to_vec()))
}

/// Encode a window of events of `conversation` as a wire
/// `ConversationState`.
///
/// Every event must belong to `conversation`; an event carrying another
/// conversation id is rejected rather than relabelled.
pub fn encode_conversation_state(
    conversation: &ConversationId,
    events: &[ConversationEvent],
) -> Result<Bytes, SerializationError> {
    let mut state = wire::ConversationState {
        conversation_id: Some(wire::ConversationId {
            id: Some(conversation.0.clone()),
        }),
        event: Vec::with_capacity(events.len()),
    };

    for event in events {
        let encoded = reencode_event(event)?;
        if let Some(found) = event.conversation_id.as_ref().filter(|id| *id != conversation) {
            return Err(SerializationError::ForeignEvent {
                event: encoded.event_id.unwrap_or_default(),
                expected: conversation.clone(),
                found: found.clone(),
            });
        }
        state.event.push(encoded);
    }

    Ok(Bytes::from(state.encode_to_vec()))
}
