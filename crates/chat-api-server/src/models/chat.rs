use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::models::Message;

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Body of `POST /v1/chat/regenerate`. Forks an alternate reply for the
/// assistant message named here and streams the replacement.
#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub message_id: Uuid,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Wire-format message for the completions API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

// ===== RESPONSE EVENT MODELS =====

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub conversation_id: Uuid,
    pub branch_id: Uuid,
    pub user_message_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub stage: String, // building_context, generating
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MessageChunk {
    pub delta: String, // streaming text chunk
}

#[derive(Debug, Serialize)]
pub struct CompletionInfo {
    pub conversation_id: Uuid,
    pub branch_id: Uuid,
    pub assistant_message_id: Uuid,
    pub token_count: u32,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}
