use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::common::{Paginated, PaginationParams};
use crate::models::conversation::{ContextParams, CreateConversationRequest, UpdateConversationRequest};
use crate::security::UserId;
use crate::services::conversation::{BuiltContext, ConversationDetail};
use crate::services::ConversationService;
use crate::store::models::Conversation;
use crate::utils::error::ApiError;

/// Upper bound on client-requested context width.
const MAX_CONTEXT_MESSAGES: usize = 200;

pub async fn list_conversations(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Paginated<Conversation>>, ApiError> {
    let (page, limit) = params.clamped();
    let page = conversations.list_conversations(user_id, page, limit).await?;
    Ok(Json(page))
}

pub async fn create_conversation(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = conversations
        .create_conversation(user_id, request.title, request.model)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn get_conversation(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let detail = conversations
        .get_conversation(user_id, conversation_id)
        .await?;
    Ok(Json(detail))
}

pub async fn update_conversation(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = conversations
        .update_conversation(
            user_id,
            conversation_id,
            request.title,
            request.model,
            request.status,
        )
        .await?;
    Ok(Json(conversation))
}

pub async fn delete_conversation(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    conversations
        .delete_conversation(user_id, conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn build_context(
    Extension(conversations): Extension<Arc<ConversationService>>,
    UserId(user_id): UserId,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<ContextParams>,
) -> Result<Json<BuiltContext>, ApiError> {
    let max_messages = params.max_messages.map(|n| n.min(MAX_CONTEXT_MESSAGES));
    let context = conversations
        .build_context(
            user_id,
            conversation_id,
            params.branch_id,
            max_messages,
            params.token_budget,
        )
        .await?;
    Ok(Json(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{
        CacheConfig, ContextConfig, LimitsConfig, LlmConfig, ServerConfig, Settings,
    };
    use crate::services::cache::CacheLayer;
    use crate::store::models::{ConversationStatus, Role};
    use crate::store::MemoryStore;

    fn service() -> Arc<ConversationService> {
        let settings = Settings {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            llm: LlmConfig {
                base_url: "http://localhost:4000".to_string(),
                api_key: None,
                default_model: "gpt-4o-mini".to_string(),
                timeout_seconds: 5,
                retry_attempts: 0,
            },
            cache: CacheConfig {
                backend: "memory".to_string(),
                redis_url: String::new(),
                ttl_models: 300,
                ttl_user_profile: 600,
                ttl_conversations: 120,
                ttl_default: 3600,
            },
            limits: LimitsConfig {
                max_conversations_per_user: 0,
                max_messages_per_conversation: 0,
                max_branches_per_conversation: 0,
            },
            context: ContextConfig {
                max_messages: 50,
                token_budget: 4096,
            },
        };
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheLayer::with_primary(None, settings.cache.clone()));
        Arc::new(ConversationService::new(store, cache, &settings))
    }

    #[tokio::test]
    async fn lifecycle_via_handlers() {
        let conversations = service();
        let user_id = Uuid::new_v4();

        let (status, Json(created)) = create_conversation(
            Extension(conversations.clone()),
            UserId(user_id),
            Json(CreateConversationRequest {
                title: Some("notes".to_string()),
                model: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.title.as_deref(), Some("notes"));
        assert_eq!(created.model, "gpt-4o-mini");

        let Json(updated) = update_conversation(
            Extension(conversations.clone()),
            UserId(user_id),
            Path(created.id),
            Json(UpdateConversationRequest {
                title: None,
                model: None,
                status: Some(ConversationStatus::Archived),
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.status, ConversationStatus::Archived);

        let Json(detail) = get_conversation(
            Extension(conversations.clone()),
            UserId(user_id),
            Path(created.id),
        )
        .await
        .unwrap();
        assert_eq!(detail.conversation.id, created.id);
        assert_eq!(detail.branches.len(), 1);

        let status = delete_conversation(
            Extension(conversations.clone()),
            UserId(user_id),
            Path(created.id),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = get_conversation(Extension(conversations), UserId(user_id), Path(created.id))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn context_endpoint_passes_width_params_through() {
        let conversations = service();
        let user_id = Uuid::new_v4();

        let first = conversations
            .add_user_message(user_id, None, None, Role::User, "q1".to_string(), None)
            .await
            .unwrap();
        conversations
            .save_assistant_message(
                user_id,
                first.conversation_id,
                None,
                Some(first.id),
                "a1".to_string(),
                None,
                None,
            )
            .await
            .unwrap();

        let Json(context) = build_context(
            Extension(conversations),
            UserId(user_id),
            Path(first.conversation_id),
            Query(ContextParams {
                branch_id: None,
                max_messages: Some(1),
                token_budget: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(context.messages.len(), 1);
        assert_eq!(context.messages[0].content, "a1");
        assert!(context.truncated);
    }
}
