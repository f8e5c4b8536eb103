use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::branch::{BranchMessagesParams, CreateBranchRequest, MergeBranchRequest, RenameBranchRequest};
use crate::security::UserId;
use crate::services::ConversationService;
use crate::store::models::{Branch, Conversation, Message};
use crate::utils::error::ApiError;

pub async fn list_branches(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<Branch>>, ApiError> {
    let branches = conversations.list_branches(user_id, conversation_id).await?;
    Ok(Json(branches))
}

pub async fn create_branch(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<CreateBranchRequest>,
) -> Result<(StatusCode, Json<Branch>), ApiError> {
    let branch = conversations
        .create_branch(user_id, conversation_id, request.parent_message_id, request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

pub async fn activate_branch(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path((conversation_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = conversations
        .activate_branch(user_id, conversation_id, branch_id)
        .await?;
    Ok(Json(conversation))
}

pub async fn branch_messages(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path((conversation_id, branch_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<BranchMessagesParams>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = conversations
        .branch_messages(user_id, conversation_id, branch_id, params.limit)
        .await?;
    Ok(Json(messages))
}

pub async fn rename_branch(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path((conversation_id, branch_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<RenameBranchRequest>,
) -> Result<Json<Branch>, ApiError> {
    let branch = conversations
        .rename_branch(user_id, conversation_id, branch_id, request.name)
        .await?;
    Ok(Json(branch))
}

pub async fn abandon_branch(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path((conversation_id, branch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Branch>, ApiError> {
    let branch = conversations
        .abandon_branch(user_id, conversation_id, branch_id)
        .await?;
    Ok(Json(branch))
}

/// Merges the branch in the path into the target named in the body.
pub async fn merge_branch(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path((conversation_id, branch_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<MergeBranchRequest>,
) -> Result<Json<Branch>, ApiError> {
    let branch = conversations
        .merge_branches(user_id, conversation_id, branch_id, request.target_branch_id)
        .await?;
    Ok(Json(branch))
}
