use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::model::{DeletionScope, Message, TempId};
use crate::session::Timeline;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join { user_id: String, peer_id: String },
    #[serde(rename = "send_message")]
    SendMessage { text: String },
    #[serde(rename = "toggle_reaction")]
    ToggleReaction { message_id: String, symbol: String },
    #[serde(rename = "delete_message")]
    DeleteMessage {
        message_id: String,
        scope: DeletionScope,
    },
    #[serde(rename = "clear_chat")]
    ClearChat,
    #[serde(rename = "timeline")]
    Timeline {
        #[serde(default)]
        query: String,
    },
}

#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined { timeline: Timeline },
    #[serde(rename = "message_pending")]
    MessagePending { temp_id: TempId },
    #[serde(rename = "message_sent")]
    MessageSent { temp_id: TempId, message: Message },
    #[serde(rename = "message_updated")]
    MessageUpdated { message: Message },
    #[serde(rename = "chat_cleared")]
    ChatCleared { matched: usize, modified: usize },
    #[serde(rename = "timeline")]
    Timeline { timeline: Timeline },
    #[serde(rename = "error")]
    Error {
        code: &'static str,
        message: String,
        retryable: bool,
    },
}

impl From<&ChatError> for ServerMessage {
    fn from(e: &ChatError) -> Self {
        ServerMessage::Error {
            code: e.code(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}
