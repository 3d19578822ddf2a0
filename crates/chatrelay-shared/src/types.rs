use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Upstream user identity: the backend assigns both a chat id and a gaia id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct UserId {
    pub chat_id: String,
    pub gaia_id: String,
}

impl UserId {
    pub fn new(chat_id: impl Into<String>, gaia_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            gaia_id: gaia_id.into(),
        }
    }

    /// Id for accounts where chat id and gaia id coincide (the common case).
    pub fn single(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            chat_id: id.clone(),
            gaia_id: id,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chat_id == self.gaia_id {
            write!(f, "{}", self.chat_id)
        } else {
            write!(f, "{}/{}", self.chat_id, self.gaia_id)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user record as known to the upstream session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub is_self: bool,
}

/// Summary of one conversation, as listed in the conversation directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
    /// Microseconds since the Unix epoch.
    #[serde(default)]
    pub last_modified: u64,
    #[serde(default)]
    pub archived: bool,
}

impl ConversationSummary {
    pub fn last_modified_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(i64::try_from(self.last_modified).ok()?)
    }
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

/// All users known to the session, in the order upstream reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<User>", into = "Vec<User>")]
pub struct UserDirectory {
    users: Vec<User>,
    index: HashMap<UserId, usize>,
}

impl UserDirectory {
    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.index.get(id).map(|&i| &self.users[i])
    }

    pub fn all(&self) -> &[User] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl From<Vec<User>> for UserDirectory {
    fn from(users: Vec<User>) -> Self {
        let index = users
            .iter()
            .enumerate()
            .map(|(i, user)| (user.id.clone(), i))
            .collect();
        Self { users, index }
    }
}

impl From<UserDirectory> for Vec<User> {
    fn from(directory: UserDirectory) -> Self {
        directory.users
    }
}

/// All conversations known to the session, archived ones included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ConversationSummary>", into = "Vec<ConversationSummary>")]
pub struct ConversationDirectory {
    conversations: Vec<ConversationSummary>,
    index: HashMap<ConversationId, usize>,
}

impl ConversationDirectory {
    pub fn get(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.index.get(id).map(|&i| &self.conversations[i])
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.index.contains_key(id)
    }

    /// Conversations in upstream order, optionally skipping archived ones.
    pub fn all(&self, include_archived: bool) -> impl Iterator<Item = &ConversationSummary> {
        self.conversations
            .iter()
            .filter(move |c| include_archived || !c.archived)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl From<Vec<ConversationSummary>> for ConversationDirectory {
    fn from(conversations: Vec<ConversationSummary>) -> Self {
        let index = conversations
            .iter()
            .enumerate()
            .map(|(i, conv)| (conv.id.clone(), i))
            .collect();
        Self {
            conversations,
            index,
        }
    }
}

impl From<ConversationDirectory> for Vec<ConversationSummary> {
    fn from(directory: ConversationDirectory) -> Self {
        directory.conversations
    }
}
