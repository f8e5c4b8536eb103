use tracing::debug;
use uuid::Uuid;

use super::token_counter::TokenCounter;
use crate::config::settings::LimitsConfig;
use crate::store::models::{BranchStatus, ConversationRecord, Message, Role};
use crate::utils::error::ApiError;

/// Characters of the first assistant reply used for the auto-generated title.
const TITLE_PREFIX_CHARS: usize = 50;

/// Tree operations over a conversation's message arena. Messages reference
/// each other by id; walks are O(depth) and every walk is guarded against
/// parent cycles.
pub struct MessageTree {
    max_messages: usize,
}

impl MessageTree {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_messages: limits.max_messages_per_conversation,
        }
    }

    pub fn add_message(
        &self,
        record: &mut ConversationRecord,
        parent_id: Option<Uuid>,
        branch_id: Uuid,
        role: Role,
        content: String,
        model: Option<String>,
        token_count: Option<u32>,
    ) -> Result<Message, ApiError> {
        if self.max_messages > 0 && record.messages.len() >= self.max_messages {
            return Err(ApiError::LimitExceeded(format!(
                "conversation {} already holds {} messages",
                record.id(),
                record.messages.len()
            )));
        }

        let branch = record.branches.get(&branch_id).ok_or_else(|| {
            ApiError::InvalidBranch(format!(
                "branch {} does not belong to conversation {}",
                branch_id,
                record.id()
            ))
        })?;
        if branch.status != BranchStatus::Active {
            return Err(ApiError::InvalidBranch(format!(
                "branch {} is {:?} and cannot receive messages",
                branch_id, branch.status
            )));
        }

        match parent_id {
            Some(parent) => {
                if !record.messages.contains_key(&parent) {
                    return Err(ApiError::InvalidParent(format!(
                        "parent {} does not belong to conversation {}",
                        parent,
                        record.id()
                    )));
                }
            }
            None => {
                if record.root_message().is_some() {
                    return Err(ApiError::InvalidParent(format!(
                        "conversation {} already has a root message",
                        record.id()
                    )));
                }
            }
        }

        let token_count =
            token_count.unwrap_or_else(|| TokenCounter::count_text(&content) as u32);
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: record.id(),
            branch_id,
            parent_id,
            role,
            content,
            model,
            token_count,
            created_at: chrono::Utc::now(),
        };

        debug!(
            conversation_id = %record.id(),
            message_id = %message.id,
            role = ?role,
            "adding message"
        );
        record.messages.insert(message.id, message.clone());
        self.maybe_generate_title(record);
        record.touch();

        Ok(message)
    }

    /// One-time title transition: fires when the conversation reaches exactly
    /// two messages and no explicit title was ever set.
    fn maybe_generate_title(&self, record: &mut ConversationRecord) {
        if record.messages.len() != 2 || record.conversation.title.is_some() {
            return;
        }

        let derived = record
            .messages
            .values()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.chars().take(TITLE_PREFIX_CHARS).collect::<String>())
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());

        if let Some(title) = derived {
            debug!(conversation_id = %record.id(), %title, "auto-generated title");
            record.conversation.title = Some(title);
        }
    }

    pub fn get_message<'a>(
        &self,
        record: &'a ConversationRecord,
        message_id: Uuid,
    ) -> Result<&'a Message, ApiError> {
        record
            .messages
            .get(&message_id)
            .ok_or_else(|| ApiError::NotFound(format!("message {}", message_id)))
    }

    pub fn edit_message(
        &self,
        record: &mut ConversationRecord,
        message_id: Uuid,
        content: String,
    ) -> Result<Message, ApiError> {
        let message = record
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ApiError::NotFound(format!("message {}", message_id)))?;
        if message.role != Role::User {
            return Err(ApiError::InvalidRole(format!(
                "message {} is {:?}; only user messages can be edited",
                message_id, message.role
            )));
        }

        message.token_count = TokenCounter::count_text(&content) as u32;
        message.content = content;
        let message = message.clone();
        record.touch();
        Ok(message)
    }

    /// The visible sequence of a branch, root first: the ancestor prefix up
    /// from the fork point, then the branch's own chain. With `limit`, only
    /// the most recent messages are returned and the leaf is always kept.
    pub fn get_path(
        &self,
        record: &ConversationRecord,
        branch_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, ApiError> {
        let branch = record
            .branches
            .get(&branch_id)
            .ok_or_else(|| ApiError::NotFound(format!("branch {}", branch_id)))?;

        let mut path = self.ancestors_inclusive(record, branch.parent_message_id)?;

        let mut cursor = branch.parent_message_id;
        let mut steps = 0usize;
        while let Some(next) = self.next_in_branch(record, cursor, branch_id) {
            steps += 1;
            if steps > record.messages.len() {
                return Err(ApiError::InternalInconsistency(format!(
                    "branch {} chain exceeds message count",
                    branch_id
                )));
            }
            cursor = Some(next.id);
            path.push(next.clone());
        }

        if let Some(limit) = limit {
            let keep = limit.max(1).min(path.len());
            path.drain(..path.len() - keep);
        }
        Ok(path)
    }

    /// Root-to-message sequence for a single message.
    pub fn get_thread(
        &self,
        record: &ConversationRecord,
        message_id: Uuid,
    ) -> Result<Vec<Message>, ApiError> {
        if !record.messages.contains_key(&message_id) {
            return Err(ApiError::NotFound(format!("message {}", message_id)));
        }
        self.ancestors_inclusive(record, Some(message_id))
    }

    pub fn children(
        &self,
        record: &ConversationRecord,
        message_id: Uuid,
    ) -> Result<Vec<Message>, ApiError> {
        if !record.messages.contains_key(&message_id) {
            return Err(ApiError::NotFound(format!("message {}", message_id)));
        }
        Ok(record
            .children_of(message_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn siblings(
        &self,
        record: &ConversationRecord,
        message_id: Uuid,
    ) -> Result<Vec<Message>, ApiError> {
        let message = self.get_message(record, message_id)?;
        let Some(parent_id) = message.parent_id else {
            return Ok(Vec::new());
        };
        Ok(record
            .children_of(parent_id)
            .into_iter()
            .filter(|m| m.id != message_id)
            .cloned()
            .collect())
    }

    /// Walks `parent_id` links from `start` (inclusive) to the root and
    /// returns the chain root first. A dangling reference or a cycle is an
    /// internal fault, never a silently shortened result.
    fn ancestors_inclusive(
        &self,
        record: &ConversationRecord,
        start: Option<Uuid>,
    ) -> Result<Vec<Message>, ApiError> {
        let mut chain = Vec::new();
        let mut cursor = start;
        while let Some(id) = cursor {
            let message = record.messages.get(&id).ok_or_else(|| {
                ApiError::InternalInconsistency(format!(
                    "message {} referenced but not present in conversation {}",
                    id,
                    record.id()
                ))
            })?;
            chain.push(message.clone());
            if chain.len() > record.messages.len() {
                return Err(ApiError::InternalInconsistency(format!(
                    "parent chain of message {} does not terminate",
                    id
                )));
            }
            cursor = message.parent_id;
        }
        chain.reverse();
        Ok(chain)
    }

    /// The continuation of `branch_id` under `parent`. When concurrent
    /// writers left sibling continuations inside one branch, the newest one
    /// wins; older siblings stay reachable through `children`.
    fn next_in_branch<'a>(
        &self,
        record: &'a ConversationRecord,
        parent: Option<Uuid>,
        branch_id: Uuid,
    ) -> Option<&'a Message> {
        record
            .messages
            .values()
            .filter(|m| m.parent_id == parent && m.branch_id == branch_id)
            .max_by_key(|m| (m.created_at, m.id))
    }
}
