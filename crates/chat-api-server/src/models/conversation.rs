use serde::Deserialize;
use uuid::Uuid;

use crate::store::models::ConversationStatus;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Only `active` and `archived` are accepted here.
    #[serde(default)]
    pub status: Option<ConversationStatus>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ContextParams {
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub token_budget: Option<usize>,
}
