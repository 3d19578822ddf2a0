//! Native wire messages of the upstream chat protocol.
//!
//! Hand-written `prost` definitions for the subset of the protocol's
//! protobuf schema that the relay re-encodes. Field numbers and proto2
//! presence semantics match the upstream schema so that clients holding the
//! upstream `.proto` can decode the payloads directly.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct ConversationId {
    #[prost(string, optional, tag = "1")]
    pub id: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ParticipantId {
    #[prost(string, optional, tag = "1")]
    pub gaia_id: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub chat_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SegmentType {
    Text = 0,
    LineBreak = 1,
    Link = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Unknown = 0,
    RegularChatMessage = 1,
    Sms = 2,
    Voicemail = 3,
    AddUser = 4,
    RemoveUser = 5,
    ConversationRename = 6,
    Hangout = 7,
    PhoneCall = 8,
    OtrModification = 9,
    PlanMutation = 10,
    Mms = 11,
    Deprecated12 = 12,
    ObservedEvent = 13,
    GroupLinkSharingModification = 14,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HangoutEventType {
    Unknown = 0,
    Start = 1,
    End = 2,
    Join = 3,
    Leave = 4,
    ComingSoon = 5,
    Ongoing = 6,
}

#[derive(Clone, PartialEq, Message)]
pub struct Formatting {
    #[prost(bool, optional, tag = "1")]
    pub bold: Option<bool>,
    #[prost(bool, optional, tag = "2")]
    pub italic: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub strikethrough: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub underline: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct LinkData {
    #[prost(string, optional, tag = "1")]
    pub link_target: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Segment {
    #[prost(enumeration = "SegmentType", required, tag = "1")]
    pub r#type: i32,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub formatting: Option<Formatting>,
    #[prost(message, optional, tag = "4")]
    pub link_data: Option<LinkData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MessageContent {
    #[prost(message, repeated, tag = "1")]
    pub segment: Vec<Segment>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ChatMessage {
    #[prost(message, optional, tag = "3")]
    pub message_content: Option<MessageContent>,
}

#[derive(Clone, PartialEq, Message)]
pub struct HangoutEvent {
    #[prost(enumeration = "HangoutEventType", optional, tag = "1")]
    pub event_type: Option<i32>,
    #[prost(message, repeated, tag = "2")]
    pub participant_id: Vec<ParticipantId>,
    #[prost(uint64, optional, tag = "3")]
    pub hangout_duration_secs: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Event {
    #[prost(message, optional, tag = "1")]
    pub conversation_id: Option<ConversationId>,
    #[prost(message, optional, tag = "2")]
    pub sender_id: Option<ParticipantId>,
    #[prost(uint64, optional, tag = "3")]
    pub timestamp: Option<u64>,
    #[prost(int32, optional, tag = "6")]
    pub source_type: Option<i32>,
    #[prost(message, optional, tag = "7")]
    pub chat_message: Option<ChatMessage>,
    #[prost(message, optional, tag = "11")]
    pub hangout_event: Option<HangoutEvent>,
    #[prost(string, optional, tag = "12")]
    pub event_id: Option<String>,
    #[prost(enumeration = "EventType", optional, tag = "23")]
    pub event_type: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConversationState {
    #[prost(message, optional, tag = "1")]
    pub conversation_id: Option<ConversationId>,
    #[prost(message, repeated, tag = "3")]
    pub event: Vec<Event>,
}

impl Event {
    /// Decode a single event, e.g. a `chat_message` push payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(data)
    }
}

impl ConversationState {
    pub fn from_bytes(data: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(data)
    }
}
