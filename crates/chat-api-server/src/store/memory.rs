use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::models::{Conversation, ConversationRecord, ConversationStatus, UserProfile};
use super::ConversationStore;
use crate::utils::error::ApiError;

/// In-memory store. Each conversation record is replaced wholesale on
/// commit, so readers always observe a complete pre- or post-write state.
pub struct MemoryStore {
    conversations: DashMap<Uuid, ConversationRecord>,
    /// message id -> owning conversation id
    message_index: DashMap<Uuid, Uuid>,
    profiles: DashMap<Uuid, UserProfile>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
            message_index: DashMap::new(),
            profiles: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, conversation_id: Uuid) -> Result<ConversationRecord, ApiError> {
        self.conversations
            .get(&conversation_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn commit(&self, record: ConversationRecord) -> Result<(), ApiError> {
        let conversation_id = record.id();
        let message_ids: Vec<Uuid> = record.messages.keys().copied().collect();

        self.conversations.insert(conversation_id, record);
        for message_id in message_ids {
            self.message_index.insert(message_id, conversation_id);
        }
        Ok(())
    }

    async fn remove(&self, conversation_id: Uuid) -> Result<(), ApiError> {
        let (_, record) = self
            .conversations
            .remove(&conversation_id)
            .ok_or_else(|| ApiError::NotFound(format!("conversation {}", conversation_id)))?;

        for message_id in record.messages.keys() {
            self.message_index.remove(message_id);
        }
        Ok(())
    }

    async fn conversation_of_message(&self, message_id: Uuid) -> Result<ConversationRecord, ApiError> {
        let conversation_id = self
            .message_index
            .get(&message_id)
            .map(|entry| *entry)
            .ok_or_else(|| ApiError::NotFound(format!("message {}", message_id)))?;
        self.load(conversation_id).await
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Conversation>, usize), ApiError> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| {
                entry.conversation.user_id == user_id
                    && entry.conversation.status != ConversationStatus::Deleted
            })
            .map(|entry| entry.conversation.clone())
            .collect();

        // Most recently updated first; id breaks ties deterministically.
        conversations.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = conversations.len();
        let page = page.max(1);
        let items = conversations
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();
        Ok((items, total))
    }

    async fn count_for_user(&self, user_id: Uuid) -> Result<usize, ApiError> {
        Ok(self
            .conversations
            .iter()
            .filter(|entry| {
                entry.conversation.user_id == user_id
                    && entry.conversation.status != ConversationStatus::Deleted
            })
            .count())
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, ApiError> {
        Ok(self.profiles.get(&user_id).map(|entry| entry.clone()))
    }

    async fn upsert_profile(&self, profile: UserProfile) -> Result<(), ApiError> {
        self.profiles.insert(profile.user_id, profile);
        Ok(())
    }
}
