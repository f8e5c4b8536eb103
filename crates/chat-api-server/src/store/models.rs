use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Merged,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub model: String,
    pub active_branch_id: Uuid,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// None only for the implicit main branch: it forks from the conversation root.
    pub parent_message_id: Option<Uuid>,
    pub name: String,
    pub status: BranchStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub branch_id: Uuid,
    /// None only for the first message of a conversation.
    pub parent_id: Option<Uuid>,
    pub role: Role,
    pub content: String,
    pub model: Option<String>,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub spend: f64,
    /// None means unlimited.
    pub max_budget: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(conversation_id: Uuid, parent_message_id: Option<Uuid>, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            parent_message_id,
            name,
            status: BranchStatus::Active,
            created_at: Utc::now(),
        }
    }
}

impl UserProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            spend: 0.0,
            max_budget: None,
            created_at: Utc::now(),
        }
    }
}

/// One conversation's complete state: metadata plus the branch table and the
/// message arena. This is the unit the store loads and commits atomically.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub conversation: Conversation,
    pub branches: HashMap<Uuid, Branch>,
    pub messages: HashMap<Uuid, Message>,
}

impl ConversationRecord {
    /// Creates a conversation together with its implicit main branch.
    pub fn create(user_id: Uuid, title: Option<String>, model: String) -> Self {
        let conversation_id = Uuid::new_v4();
        let main = Branch::new(conversation_id, None, "main".to_string());
        let now = Utc::now();

        let conversation = Conversation {
            id: conversation_id,
            user_id,
            title,
            model,
            active_branch_id: main.id,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let mut branches = HashMap::new();
        branches.insert(main.id, main);

        Self {
            conversation,
            branches,
            messages: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.conversation.id
    }

    pub fn touch(&mut self) {
        self.conversation.updated_at = Utc::now();
    }

    pub fn root_message(&self) -> Option<&Message> {
        self.messages.values().find(|m| m.parent_id.is_none())
    }

    /// Children of a message, oldest first. Ordering ties break on id so the
    /// result is stable across calls.
    pub fn children_of(&self, message_id: Uuid) -> Vec<&Message> {
        let mut children: Vec<&Message> = self
            .messages
            .values()
            .filter(|m| m.parent_id == Some(message_id))
            .collect();
        children.sort_by_key(|m| (m.created_at, m.id));
        children
    }

    pub fn branches_sorted(&self) -> Vec<&Branch> {
        let mut branches: Vec<&Branch> = self.branches.values().collect();
        branches.sort_by_key(|b| (b.created_at, b.id));
        branches
    }

    pub fn messages_sorted(&self) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self.messages.values().collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        messages
    }
}
