//! One viewer's chat with one peer: the commands a UI issues, dispatched to
//! the reconciler, the policies and the store.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::bulk_clear;
use crate::conversation::{self, ConversationStore};
use crate::error::{ChatError, ChatResult};
use crate::model::{DeletionScope, Draft, Message, TempId, UserId};
use crate::reactions::{self, ReactionSummary};
use crate::reconciler;
use crate::store::{BulkUpdate, MessageStore};
use crate::visibility;

pub struct ChatSession<S: MessageStore + ?Sized> {
    viewer: UserId,
    peer: UserId,
    store: Arc<S>,
    conversation: ConversationStore,
}

impl<S: MessageStore + ?Sized> ChatSession<S> {
    /// Opens the conversation and loads its history from the store.
    pub async fn open(store: Arc<S>, viewer: UserId, peer: UserId) -> ChatResult<Self> {
        let history = store.conversation(&viewer, &peer).await?;
        let mut conversation = ConversationStore::new(viewer.clone(), peer.clone());
        for message in history {
            conversation.insert_or_update(message)?;
        }
        debug!("opened chat {} -> {} with {} messages", viewer, peer, conversation.len());

        Ok(ChatSession {
            viewer,
            peer,
            store,
            conversation,
        })
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    /// Adds the optimistic entry for `text` and returns the draft to persist.
    pub fn begin_send(&mut self, text: &str) -> ChatResult<Draft> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let draft = Draft {
            temp_id: TempId::generate(),
            sender_id: self.viewer.clone(),
            receiver_id: self.peer.clone(),
            text: text.to_owned(),
            timestamp: Utc::now(),
        };
        let pending = reconciler::create_optimistic(
            draft.temp_id.clone(),
            draft.sender_id.clone(),
            draft.receiver_id.clone(),
            draft.text.clone(),
            draft.timestamp,
        );
        self.conversation.insert_or_update(pending)?;
        Ok(draft)
    }

    /// Resolves a pending send with the store's answer.
    pub fn finish_send(&mut self, temp_id: &TempId, result: ChatResult<Message>) -> ChatResult<Message> {
        match result {
            Ok(confirmed) => {
                reconciler::confirm(&mut self.conversation, temp_id, confirmed.clone())
                    .map_err(|e| reconciler::fail(&mut self.conversation, temp_id, e.to_string()))?;
                Ok(confirmed)
            }
            Err(e) => {
                warn!("send {} failed: {}", temp_id, e);
                Err(reconciler::fail(&mut self.conversation, temp_id, e.to_string()))
            }
        }
    }

    pub async fn send_message(&mut self, text: &str) -> ChatResult<Message> {
        let draft = self.begin_send(text)?;
        let temp_id = draft.temp_id.clone();
        let result = self.store.insert(draft).await;
        self.finish_send(&temp_id, result)
    }

    pub async fn toggle_reaction(&mut self, message_id: &str, symbol: &str) -> ChatResult<Message> {
        let target = self.conversation.resolve(message_id)?;
        let id = reconciler::ensure_confirmed(target)?.clone();
        let toggled = reactions::toggle(Some(&id), &target.reactions, &self.viewer, symbol)?;
        let next = toggled.get(&self.viewer).cloned();

        let updated = self
            .store
            .set_reaction(&id, &self.viewer, next.as_deref())
            .await?;
        self.apply_remote(updated.clone());
        Ok(updated)
    }

    pub async fn delete_message(&mut self, message_id: &str, scope: DeletionScope) -> ChatResult<Message> {
        let target = self.conversation.resolve(message_id)?;
        let id = reconciler::ensure_confirmed(target)?.clone();
        if let Err(e) = visibility::authorize_delete(target, &self.viewer, scope) {
            warn!("{} tried to delete {} ({:?}): {}", self.viewer, id, scope, e);
            return Err(e);
        }

        let updated = match scope {
            DeletionScope::ForMe => self.store.add_deleted_for(&id, &self.viewer).await?,
            DeletionScope::ForEveryone => self.store.mark_deleted_for_everyone(&id).await?,
        };
        if let Some(local) = self.conversation.get_mut(&id) {
            visibility::apply_delete(local, &self.viewer, scope);
        }
        self.apply_remote(updated.clone());
        info!("{} deleted {} ({:?})", self.viewer, id, scope);
        Ok(updated)
    }

    pub async fn clear_chat(&mut self) -> ChatResult<BulkUpdate> {
        let outcome = bulk_clear::clear_conversation(
            self.store.as_ref(),
            Some(self.viewer.as_str()),
            Some(self.peer.as_str()),
        )
        .await?;
        self.conversation.apply_clear(&self.viewer);
        Ok(outcome)
    }

    /// Merges a persisted message delivered by the store or another session.
    /// Messages from other conversations are ignored.
    pub fn apply_remote(&mut self, message: Message) {
        if let Err(e) = self.conversation.insert_or_update(message) {
            debug!("ignored remote update for {}: {}", self.viewer, e);
        }
    }

    /// Mirrors a clear issued by another session of the same viewer.
    pub fn apply_clear(&mut self) -> usize {
        self.conversation.apply_clear(&self.viewer)
    }

    /// The render-ready view: visible messages, filtered by `query`, grouped
    /// by day in `now`'s time zone.
    pub fn timeline<Tz: TimeZone>(&self, query: &str, now: &DateTime<Tz>) -> Timeline {
        let visible = self.conversation.visible_for(&self.viewer);
        let searching = !query.trim().is_empty();
        let found = conversation::search(visible, query);
        let matches = searching.then_some(found.len());

        let days = conversation::group_by_day(found, now)
            .into_iter()
            .map(|group| DayView {
                label: group.label,
                messages: group
                    .messages
                    .into_iter()
                    .map(|m| MessageView::new(m, &self.viewer))
                    .collect(),
            })
            .collect();

        Timeline { days, matches }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub days: Vec<DayView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    pub label: String,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub pending: bool,
    pub can_delete_for_everyone: bool,
    pub reaction_summary: ReactionSummary,
}

impl MessageView {
    fn new(message: &Message, viewer: &UserId) -> Self {
        MessageView {
            pending: message.is_pending(),
            can_delete_for_everyone: !message.is_pending() && &message.sender_id == viewer,
            reaction_summary: reactions::aggregate_for(&message.reactions, viewer),
            message: message.clone(),
        }
    }
}
