use serde::Serialize;
use uuid::Uuid;

use crate::store::models::{Branch, Conversation, Message};

/// A bounded, chronologically ordered prompt sequence.
#[derive(Debug, Clone, Serialize)]
pub struct BuiltContext {
    pub branch_id: Uuid,
    pub messages: Vec<Message>,
    pub token_count: usize,
    pub truncated: bool,
}

/// Full view of one conversation: metadata, every branch and every message.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub branches: Vec<Branch>,
    pub messages: Vec<Message>,
}
