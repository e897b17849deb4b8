//! Persistence boundary. The core talks to storage only through
//! [`MessageStore`]; [`MemoryStore`] is the in-process implementation used by
//! the server and the tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{ChatError, ChatResult};
use crate::model::{Draft, Message, MessageId, ReactionMap, UserId};

/// Selects the messages a bulk clear applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearFilter {
    pub participants: (UserId, UserId),
    pub exclude_deleted_for_everyone: bool,
}

impl ClearFilter {
    pub fn conversation(a: UserId, b: UserId) -> Self {
        ClearFilter {
            participants: (a, b),
            exclude_deleted_for_everyone: true,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        let (a, b) = &self.participants;
        message.belongs_to(a, b) && !(self.exclude_deleted_for_everyone && message.deleted_for_everyone)
    }
}

/// Result of a bulk update. `modified` counts only messages whose
/// `deletedFor` set actually grew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdate {
    pub matched: usize,
    pub modified: usize,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a draft and returns it with its assigned id.
    async fn insert(&self, draft: Draft) -> ChatResult<Message>;

    /// Every message exchanged between `a` and `b`, oldest first.
    async fn conversation(&self, a: &UserId, b: &UserId) -> ChatResult<Vec<Message>>;

    /// Sets or clears one user's reaction. Other users' entries are left
    /// alone so concurrent reactions commute.
    async fn set_reaction(
        &self,
        id: &MessageId,
        user: &UserId,
        symbol: Option<&str>,
    ) -> ChatResult<Message>;

    async fn add_deleted_for(&self, id: &MessageId, user: &UserId) -> ChatResult<Message>;

    async fn mark_deleted_for_everyone(&self, id: &MessageId) -> ChatResult<Message>;

    /// Adds `user` to `deletedFor` on every matching message, all or nothing.
    async fn clear_for(&self, filter: &ClearFilter, user: &UserId) -> ChatResult<BulkUpdate>;
}

#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with already persisted documents.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        MemoryStore {
            messages: RwLock::new(messages),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates an outage: every call fails with `StoreUnavailable` until
    /// the store is made available again.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    fn check(&self) -> ChatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }

    async fn update<F>(&self, id: &MessageId, apply: F) -> ChatResult<Message>
    where
        F: FnOnce(&mut Message) + Send,
    {
        self.check()?;
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id.as_ref() == Some(id))
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        apply(message);
        Ok(message.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, draft: Draft) -> ChatResult<Message> {
        self.check()?;
        let message = Message {
            id: Some(MessageId::generate()),
            temp_id: Some(draft.temp_id),
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            text: draft.text,
            timestamp: draft.timestamp,
            reactions: ReactionMap::new(),
            deleted_for: Default::default(),
            deleted_for_everyone: false,
        };
        self.messages.write().await.push(message.clone());
        debug!("stored message {:?}", message.id);
        Ok(message)
    }

    async fn conversation(&self, a: &UserId, b: &UserId) -> ChatResult<Vec<Message>> {
        self.check()?;
        let messages = self.messages.read().await;
        let mut found: Vec<Message> = messages
            .iter()
            .filter(|m| m.belongs_to(a, b))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.timestamp);
        Ok(found)
    }

    async fn set_reaction(
        &self,
        id: &MessageId,
        user: &UserId,
        symbol: Option<&str>,
    ) -> ChatResult<Message> {
        let symbol = symbol.map(str::to_owned);
        self.update(id, move |m| match symbol {
            Some(symbol) => {
                m.reactions.insert(user.clone(), symbol);
            }
            None => {
                m.reactions.remove(user);
            }
        })
        .await
    }

    async fn add_deleted_for(&self, id: &MessageId, user: &UserId) -> ChatResult<Message> {
        self.update(id, |m| {
            m.deleted_for.insert(user.clone());
        })
        .await
    }

    async fn mark_deleted_for_everyone(&self, id: &MessageId) -> ChatResult<Message> {
        self.update(id, |m| m.deleted_for_everyone = true).await
    }

    async fn clear_for(&self, filter: &ClearFilter, user: &UserId) -> ChatResult<BulkUpdate> {
        self.check()?;
        let mut messages = self.messages.write().await;
        let mut outcome = BulkUpdate::default();
        for message in messages.iter_mut().filter(|m| filter.matches(m)) {
            outcome.matched += 1;
            if message.deleted_for.insert(user.clone()) {
                outcome.modified += 1;
            }
        }
        Ok(outcome)
    }
}
