//! Conversation events as delivered by the upstream session.
//!
//! Upstream events can arrive partially populated, so every identifier is
//! optional here. The serializer refuses to encode an event whose
//! identifiers are missing instead of filling in defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, EventId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    /// Microseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Raw protocol value, carried through untouched.
    #[serde(default)]
    pub source_type: Option<i32>,
    /// Raw protocol event type (regular chat message, SMS, OTR change, ...).
    /// Carried through untouched, never derived from the payload.
    #[serde(default)]
    pub event_type: Option<i32>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ChatMessage(ChatMessage),
    Hangout(HangoutEvent),
    /// Any other event (membership change, rename, ...). The event-level
    /// `event_type` says which.
    Other,
}

/// Coarse classification used by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ChatMessage,
    Hangout,
    Other,
}

impl ConversationEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::ChatMessage(_) => EventKind::ChatMessage,
            EventPayload::Hangout(_) => EventKind::Hangout,
            EventPayload::Other => EventKind::Other,
        }
    }

    pub fn is_chat_message(&self) -> bool {
        self.kind() == EventKind::ChatMessage
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(i64::try_from(self.timestamp?).ok()?)
    }

    /// Plain text of a chat message, `None` for other kinds.
    pub fn text(&self) -> Option<String> {
        match &self.payload {
            EventPayload::ChatMessage(msg) => Some(msg.text()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl ChatMessage {
    pub fn from_text(text: &str) -> Self {
        Self {
            segments: vec![Segment::text(text)],
        }
    }

    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|seg| match seg.kind {
                SegmentKind::LineBreak => "\n",
                _ => seg.text.as_deref().unwrap_or_default(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    #[default]
    Text,
    LineBreak,
    Link,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(default)]
    pub kind: SegmentKind,
    /// Absent for line breaks, and distinct from an empty string.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub formatting: Option<Formatting>,
    #[serde(default)]
    pub link_target: Option<String>,
}

impl Segment {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

/// Formatting flags exactly as upstream sent them; an unset flag stays
/// unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formatting {
    #[serde(default)]
    pub bold: Option<bool>,
    #[serde(default)]
    pub italic: Option<bool>,
    #[serde(default)]
    pub strikethrough: Option<bool>,
    #[serde(default)]
    pub underline: Option<bool>,
}

/// Call lifecycle event (start, end, join, leave, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangoutEvent {
    /// Raw protocol hangout event type.
    #[serde(default)]
    pub event_type: Option<i32>,
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_text_joins_segments() {
        let msg = ChatMessage {
            segments: vec![
                Segment::text("hello"),
                Segment {
                    kind: SegmentKind::LineBreak,
                    ..Segment::default()
                },
                Segment::text("world"),
            ],
        };
        assert_eq!(msg.text(), "hello\nworld");
    }

    #[test]
    fn test_unset_segment_fields_stay_unset() {
        let json = r#"{"kind": "line_break"}"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert_eq!(segment.text, None);
        assert_eq!(segment.formatting, None);

        let json = r#"{"text": "x", "formatting": {"bold": false}}"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        let formatting = segment.formatting.unwrap();
        assert_eq!(formatting.bold, Some(false));
        assert_eq!(formatting.italic, None);
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "eventId": "e1",
            "conversationId": "c1",
            "senderId": {"chatId": "u1", "gaiaId": "u1"},
            "timestamp": 1700000000000000,
            "payload": {"kind": "chat_message", "segments": [{"text": "hi"}]}
        }"#;
        let event: ConversationEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_chat_message());
        assert_eq!(event.text().as_deref(), Some("hi"));
        assert_eq!(event.timestamp_utc().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_other_event_is_not_chat() {
        let event = ConversationEvent {
            event_id: Some(EventId::from("e2")),
            conversation_id: None,
            sender_id: None,
            timestamp: None,
            source_type: None,
            event_type: Some(6),
            payload: EventPayload::Other,
        };
        assert_eq!(event.kind(), EventKind::Other);
        assert!(event.text().is_none());
    }
}
