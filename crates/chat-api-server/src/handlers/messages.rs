use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::message::{AddMessageRequest, EditMessageRequest};
use crate::security::UserId;
use crate::services::ConversationService;
use crate::store::models::{Message, Role};
use crate::utils::error::ApiError;

/// Records one turn. User and system turns go through the tree's implicit
/// placement rules; assistant turns must name the conversation they extend.
pub async fn add_message(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Json(request): Json<AddMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = match request.role {
        Role::Assistant => {
            let Some(conversation_id) = request.conversation_id else {
                return Err(ApiError::InvalidTarget(
                    "an assistant message needs a conversation".to_string(),
                ));
            };
            conversations
                .save_assistant_message(
                    user_id,
                    conversation_id,
                    request.branch_id,
                    request.parent_id,
                    request.content,
                    request.model,
                    request.token_count,
                )
                .await?
        }
        role => {
            conversations
                .add_user_message(
                    user_id,
                    request.conversation_id,
                    request.parent_id,
                    role,
                    request.content,
                    request.model,
                )
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_message(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Message>, ApiError> {
    let message = conversations.get_message(user_id, message_id).await?;
    Ok(Json(message))
}

pub async fn edit_message(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(message_id): Path<Uuid>,
    Json(request): Json<EditMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let message = conversations
        .edit_message(user_id, message_id, request.content)
        .await?;
    Ok(Json(message))
}

pub async fn get_thread(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let thread = conversations.get_thread(user_id, message_id).await?;
    Ok(Json(thread))
}

pub async fn get_children(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let children = conversations.children(user_id, message_id).await?;
    Ok(Json(children))
}

pub async fn get_siblings(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let siblings = conversations.siblings(user_id, message_id).await?;
    Ok(Json(siblings))
}
