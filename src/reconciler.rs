//! Moves a locally created message from optimistic to confirmed, or drops it
//! when the send fails. Pending messages change only through these paths.

use chrono::{DateTime, Utc};

use crate::conversation::ConversationStore;
use crate::error::{ChatError, ChatResult};
use crate::model::{Message, MessageId, ReactionMap, TempId, UserId};

pub fn create_optimistic(
    temp_id: TempId,
    sender_id: UserId,
    receiver_id: UserId,
    text: String,
    timestamp: DateTime<Utc>,
) -> Message {
    Message {
        id: None,
        temp_id: Some(temp_id),
        sender_id,
        receiver_id,
        text,
        timestamp,
        reactions: ReactionMap::new(),
        deleted_for: Default::default(),
        deleted_for_everyone: false,
    }
}

/// Replaces the pending entry for `temp_id` with its persisted copy.
///
/// Without a pending entry the confirmed message is simply upserted, so
/// late or repeated confirmations never leave duplicates behind.
pub fn confirm(
    conversation: &mut ConversationStore,
    temp_id: &TempId,
    mut confirmed: Message,
) -> ChatResult<()> {
    if confirmed.id.is_none() {
        return Err(ChatError::InvalidTarget);
    }
    confirmed.temp_id.get_or_insert_with(|| temp_id.clone());

    conversation.insert_or_update(confirmed)?;
    // The transport may have delivered the persisted copy before the store
    // replied, in which case the pending entry is still there.
    conversation.remove_pending(temp_id);
    Ok(())
}

/// Drops the pending entry and hands back the error to surface to the user.
pub fn fail(conversation: &mut ConversationStore, temp_id: &TempId, reason: impl Into<String>) -> ChatError {
    conversation.remove_pending(temp_id);
    ChatError::SendFailed {
        temp_id: temp_id.clone(),
        reason: reason.into(),
    }
}

/// The persisted id of `message`, or `NotConfirmed` while it is optimistic.
pub fn ensure_confirmed(message: &Message) -> ChatResult<&MessageId> {
    match (&message.id, &message.temp_id) {
        (Some(id), _) => Ok(id),
        (None, Some(temp_id)) => Err(ChatError::NotConfirmed(temp_id.clone())),
        (None, None) => Err(ChatError::InvalidTarget),
    }
}
