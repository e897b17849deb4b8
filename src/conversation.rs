//! Ordered message set for one conversation and the views derived from it.
//!
//! Ordering is by `timestamp`, ties broken by arrival. Every view is
//! recomputed from the stored field values, so the order in which
//! reactions or deletions arrive never changes what is rendered.

use chrono::{DateTime, NaiveDate, TimeZone};

use crate::error::{ChatError, ChatResult};
use crate::model::{Message, MessageId, MessageKey, TempId, UserId};
use crate::visibility::is_visible;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: Message,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    participants: (UserId, UserId),
    entries: Vec<Entry>,
    next_seq: u64,
}

impl ConversationStore {
    pub fn new(a: UserId, b: UserId) -> Self {
        ConversationStore {
            participants: (a, b),
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.participants.0, &self.participants.1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All messages, visible or not, in display order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        self.entries
            .iter()
            .map(|e| &e.message)
            .find(|m| key.matches(m))
    }

    /// Upserts by `id`, or by `tempId` while the message is unconfirmed.
    ///
    /// A confirmed copy carrying the `tempId` of a pending entry takes that
    /// entry's place. Updates to a confirmed entry merge monotonically.
    pub fn insert_or_update(&mut self, message: Message) -> ChatResult<()> {
        let key = message.key().ok_or(ChatError::InvalidTarget)?;
        let (a, b) = self.participants();
        if !message.belongs_to(a, b) {
            return Err(ChatError::InvalidTarget);
        }

        let existing = self.position(&key).or_else(|| {
            message
                .temp_id
                .as_ref()
                .and_then(|t| self.position(&MessageKey::Temp(t.clone())))
        });

        match existing {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                if entry.message.is_pending() {
                    entry.message = message;
                } else {
                    entry.message.merge_from(message);
                }
                self.sort();
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                let at = self
                    .entries
                    .partition_point(|e| e.message.timestamp <= message.timestamp);
                self.entries.insert(at, Entry { seq, message });
            }
        }
        Ok(())
    }

    /// Looks up a command target. Unconfirmed messages are reported as
    /// `NotConfirmed` so callers never act on them.
    pub fn resolve(&self, raw: &str) -> ChatResult<&Message> {
        let id = MessageId::parse(raw).ok_or(ChatError::InvalidTarget)?;
        if let Some(message) = self.get(&MessageKey::Id(id)) {
            return Ok(message);
        }
        if let Some(temp_id) = TempId::parse(raw) {
            if self.get(&MessageKey::Temp(temp_id.clone())).is_some() {
                return Err(ChatError::NotConfirmed(temp_id));
            }
        }
        Err(ChatError::UnknownMessage(raw.trim().to_owned()))
    }

    pub(crate) fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.entries
            .iter_mut()
            .map(|e| &mut e.message)
            .find(|m| m.id.as_ref() == Some(id))
    }

    pub(crate) fn remove_pending(&mut self, temp_id: &TempId) -> Option<Message> {
        let idx = self.position(&MessageKey::Temp(temp_id.clone()))?;
        Some(self.entries.remove(idx).message)
    }

    /// Mirrors a successful "clear for me" locally: every confirmed message
    /// not deleted for everyone gains `user` in its `deletedFor` set.
    pub fn apply_clear(&mut self, user: &UserId) -> usize {
        let mut modified = 0;
        for entry in &mut self.entries {
            let message = &mut entry.message;
            if message.is_pending() || message.deleted_for_everyone {
                continue;
            }
            if message.deleted_for.insert(user.clone()) {
                modified += 1;
            }
        }
        modified
    }

    pub fn visible_for(&self, viewer: &UserId) -> Vec<&Message> {
        self.messages().filter(|m| is_visible(m, viewer)).collect()
    }

    fn position(&self, key: &MessageKey) -> Option<usize> {
        self.entries.iter().position(|e| key.matches(&e.message))
    }

    fn sort(&mut self) {
        self.entries
            .sort_by_key(|e| (e.message.timestamp, e.seq));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup<'a> {
    pub date: NaiveDate,
    pub label: String,
    pub messages: Vec<&'a Message>,
}

pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_owned()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_owned()
    } else {
        date.format("%b %-d, %Y").to_string()
    }
}

/// Buckets messages by calendar date in `now`'s time zone. Labels depend on
/// `now` and are never cached.
pub fn group_by_day<'a, Tz: TimeZone>(
    messages: Vec<&'a Message>,
    now: &DateTime<Tz>,
) -> Vec<DayGroup<'a>> {
    let zone = now.timezone();
    let today = now.date_naive();
    let mut groups: Vec<DayGroup<'a>> = Vec::new();

    for message in messages {
        let date = message.timestamp.with_timezone(&zone).date_naive();
        match groups.iter_mut().find(|g| g.date == date) {
            Some(group) => group.messages.push(message),
            None => groups.push(DayGroup {
                date,
                label: day_label(date, today),
                messages: vec![message],
            }),
        }
    }
    groups
}

/// Case-insensitive substring match over message text. A blank query hands
/// the input back untouched.
pub fn search<'a>(messages: Vec<&'a Message>, query: &str) -> Vec<&'a Message> {
    if query.trim().is_empty() {
        return messages;
    }
    let needle = query.to_lowercase();
    messages
        .into_iter()
        .filter(|m| m.text.to_lowercase().contains(&needle))
        .collect()
}
