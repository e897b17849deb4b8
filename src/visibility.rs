use crate::error::{ChatError, ChatResult};
use crate::model::{DeletionScope, Message, UserId};

/// Whether `viewer` may see `message`. A message deleted for everyone is
/// hidden regardless of its per-user flags.
pub fn is_visible(message: &Message, viewer: &UserId) -> bool {
    !message.deleted_for_everyone && !message.deleted_for.contains(viewer)
}

/// Checks that `actor` may delete `message` with the given scope. Only the
/// sender can delete for everyone; either participant can delete for
/// themselves.
pub fn authorize_delete(message: &Message, actor: &UserId, scope: DeletionScope) -> ChatResult<()> {
    match scope {
        DeletionScope::ForEveryone if &message.sender_id != actor => Err(ChatError::Unauthorized(
            "only the sender can delete a message for everyone",
        )),
        DeletionScope::ForMe if !message.involves(actor) => Err(ChatError::Unauthorized(
            "only participants can delete a message for themselves",
        )),
        _ => Ok(()),
    }
}

/// Applies a deletion flag in place. Returns whether anything changed.
pub fn apply_delete(message: &mut Message, actor: &UserId, scope: DeletionScope) -> bool {
    match scope {
        DeletionScope::ForMe => message.deleted_for.insert(actor.clone()),
        DeletionScope::ForEveryone => !std::mem::replace(&mut message.deleted_for_everyone, true),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use super::*;
    use crate::model::{MessageId, ReactionMap};

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn message(deleted_for: &[&str], deleted_for_everyone: bool) -> Message {
        Message {
            id: MessageId::parse("m1"),
            temp_id: None,
            sender_id: user("alice"),
            receiver_id: user("bob"),
            text: "hello".into(),
            timestamp: Utc::now(),
            reactions: ReactionMap::new(),
            deleted_for: deleted_for.iter().map(|u| user(u)).collect(),
            deleted_for_everyone,
        }
    }

    #[test]
    fn deleted_for_everyone_hides_from_all() {
        for deleted_for in [&[][..], &["alice"][..], &["alice", "bob"][..]] {
            let m = message(deleted_for, true);
            assert!(!is_visible(&m, &user("alice")));
            assert!(!is_visible(&m, &user("bob")));
        }
    }

    #[test]
    fn deleted_for_hides_only_listed_viewers() {
        let m = message(&["alice"], false);
        assert!(!is_visible(&m, &user("alice")));
        assert!(is_visible(&m, &user("bob")));
        assert!(is_visible(&message(&[], false), &user("alice")));
    }

    #[test]
    fn delete_authorization() {
        let m = message(&[], false);
        assert!(authorize_delete(&m, &user("alice"), DeletionScope::ForEveryone).is_ok());
        assert!(matches!(
            authorize_delete(&m, &user("bob"), DeletionScope::ForEveryone),
            Err(ChatError::Unauthorized(_))
        ));
        assert!(authorize_delete(&m, &user("bob"), DeletionScope::ForMe).is_ok());
        assert!(matches!(
            authorize_delete(&m, &user("carol"), DeletionScope::ForMe),
            Err(ChatError::Unauthorized(_))
        ));
    }

    #[test]
    fn deletion_flags_are_independent_and_idempotent() {
        let mut m = message(&[], false);
        assert!(apply_delete(&mut m, &user("bob"), DeletionScope::ForMe));
        assert!(!apply_delete(&mut m, &user("bob"), DeletionScope::ForMe));
        assert!(apply_delete(&mut m, &user("alice"), DeletionScope::ForEveryone));
        assert!(!apply_delete(&mut m, &user("alice"), DeletionScope::ForEveryone));

        assert!(m.deleted_for_everyone);
        assert_eq!(m.deleted_for, BTreeSet::from([user("bob")]));
    }
}
