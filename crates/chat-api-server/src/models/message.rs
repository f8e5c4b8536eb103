use serde::Deserialize;
use uuid::Uuid;

use crate::store::models::Role;

/// Body of `POST /v1/messages`. `user` and `system` turns may omit the
/// conversation (one is created); assistant turns must name the conversation
/// and branch they extend.
#[derive(Debug, Deserialize)]
pub struct AddMessageRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}
