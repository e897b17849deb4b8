//! "Clear for me": hides a whole conversation from one participant.

use log::{info, warn};

use crate::error::{ChatError, ChatResult};
use crate::model::UserId;
use crate::store::{BulkUpdate, ClearFilter, MessageStore};

/// Adds `user_id` to `deletedFor` on every message between the two users
/// that is not already deleted for everyone.
///
/// Runs as a single store mutation, so it either applies everywhere or not
/// at all. Re-running it matches the same messages and modifies none.
/// Reactions and `deletedForEveryone` are never touched.
pub async fn clear_conversation<S>(
    store: &S,
    user_id: Option<&str>,
    peer_id: Option<&str>,
) -> ChatResult<BulkUpdate>
where
    S: MessageStore + ?Sized,
{
    let user = user_id
        .and_then(UserId::parse)
        .ok_or(ChatError::MissingParticipant)?;
    let peer = peer_id
        .and_then(UserId::parse)
        .ok_or(ChatError::MissingParticipant)?;

    let filter = ClearFilter::conversation(user.clone(), peer.clone());
    match store.clear_for(&filter, &user).await {
        Ok(outcome) => {
            info!(
                "cleared chat {} <-> {} for {}: matched={} modified={}",
                user, peer, user, outcome.matched, outcome.modified
            );
            Ok(outcome)
        }
        Err(e) => {
            warn!("clearing chat {} <-> {} failed: {}", user, peer, e);
            Err(match e {
                ChatError::StoreUnavailable(_) => e,
                other => ChatError::StoreUnavailable(other.to_string()),
            })
        }
    }
}
