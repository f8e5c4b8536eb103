//! Durable key-indexed persistence boundary.
//!
//! The rest of the crate only ever sees [`ConversationStore`]: whole
//! conversation records are loaded, mutated in memory and committed back in
//! one step. Backends that can replace a single record transactionally can
//! implement this trait; the shipped implementation is in-memory.

pub mod memory;
pub mod models;

use async_trait::async_trait;
use uuid::Uuid;

use crate::utils::error::ApiError;

pub use memory::MemoryStore;
pub use models::{
    Branch, BranchStatus, Conversation, ConversationRecord, ConversationStatus, Message, Role,
    UserProfile,
};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Atomic snapshot of one conversation.
    async fn load(&self, conversation_id: Uuid) -> Result<ConversationRecord, ApiError>;

    /// Replaces the stored record in a single transactional step.
    async fn commit(&self, record: ConversationRecord) -> Result<(), ApiError>;

    /// Removes a conversation and everything it owns.
    async fn remove(&self, conversation_id: Uuid) -> Result<(), ApiError>;

    /// Resolves the conversation a message belongs to.
    async fn conversation_of_message(&self, message_id: Uuid) -> Result<ConversationRecord, ApiError>;

    /// Non-deleted conversations of a user, most recently updated first.
    /// Returns the requested page and the total count. `page` is 1-based.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<(Vec<Conversation>, usize), ApiError>;

    async fn count_for_user(&self, user_id: Uuid) -> Result<usize, ApiError>;

    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, ApiError>;

    async fn upsert_profile(&self, profile: UserProfile) -> Result<(), ApiError>;

    async fn ping(&self) -> Result<(), ApiError> {
        Ok(())
    }
}
