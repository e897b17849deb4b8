use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

/// Placeholder strings some clients send instead of leaving an id out.
const SENTINELS: [&str; 2] = ["undefined", "null"];

fn usable(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || SENTINELS.contains(&trimmed) {
        None
    } else {
        Some(trimmed)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Returns `None` for empty, blank or placeholder input.
            pub fn parse(raw: &str) -> Option<Self> {
                usable(raw).map(|s| Self(s.to_owned()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ChatError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(&raw).ok_or(ChatError::InvalidTarget)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier assigned by the persistence layer.
    MessageId
);
string_id!(
    /// Client-side identifier carried by a message until it is persisted.
    TempId
);
string_id!(UserId);

impl TempId {
    pub fn generate() -> Self {
        TempId(Uuid::new_v4().to_string())
    }
}

impl MessageId {
    pub fn generate() -> Self {
        MessageId(Uuid::new_v4().to_string())
    }
}

/// Optional id fields tolerate placeholder values by treating them as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<String>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| T::try_from(s).ok()))
}

/// One reaction symbol per user.
pub type ReactionMap = BTreeMap<UserId, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub temp_id: Option<TempId>,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reactions: ReactionMap,
    #[serde(default)]
    pub deleted_for: BTreeSet<UserId>,
    #[serde(default)]
    pub deleted_for_everyone: bool,
}

impl Message {
    /// A message without a persisted id is still optimistic.
    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }

    pub fn key(&self) -> Option<MessageKey> {
        match (&self.id, &self.temp_id) {
            (Some(id), _) => Some(MessageKey::Id(id.clone())),
            (None, Some(temp_id)) => Some(MessageKey::Temp(temp_id.clone())),
            (None, None) => None,
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }

    /// True when the message was exchanged between `a` and `b`, in either
    /// direction.
    pub fn belongs_to(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }

    /// Folds a newer copy of the same message into this one. Deletion flags
    /// only ever grow; reactions follow the incoming document.
    pub fn merge_from(&mut self, incoming: Message) {
        let Message {
            id,
            temp_id,
            text,
            timestamp,
            reactions,
            deleted_for,
            deleted_for_everyone,
            ..
        } = incoming;

        if self.id.is_none() {
            self.id = id;
        }
        if self.temp_id.is_none() {
            self.temp_id = temp_id;
        }
        self.text = text;
        self.timestamp = timestamp;
        self.reactions = reactions;
        self.deleted_for.extend(deleted_for);
        self.deleted_for_everyone |= deleted_for_everyone;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Id(MessageId),
    Temp(TempId),
}

impl MessageKey {
    pub fn matches(&self, message: &Message) -> bool {
        match self {
            MessageKey::Id(id) => message.id.as_ref() == Some(id),
            MessageKey::Temp(temp_id) => {
                message.id.is_none() && message.temp_id.as_ref() == Some(temp_id)
            }
        }
    }
}

/// Content of a message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub temp_id: TempId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionScope {
    #[serde(rename = "for-me")]
    ForMe,
    #[serde(rename = "for-everyone")]
    ForEveryone,
}
