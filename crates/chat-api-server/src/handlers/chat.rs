use crate::config::settings::Settings;
use crate::models::chat::*;
use crate::security::UserId;
use crate::services::conversation::TokenCounter;
use crate::services::llm_service::TokenStream;
use crate::services::{CompletionProvider, ConversationService, ProfileService};
use crate::store::models::Role;
use crate::utils::error::ApiError;
use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub async fn chat_stream_handler(
    Extension(conversations): Extension<Arc<ConversationService>>,
    Extension(profiles): Extension<Arc<ProfileService>>,
    Extension(provider): Extension<Arc<dyn CompletionProvider>>,
    Extension(settings): Extension<Arc<Settings>>,
    UserId(user_id): UserId,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let start_time = Instant::now();

    info!(
        "Chat request: user={}, conversation={:?}, parent={:?}, content_len={}",
        user_id,
        request.conversation_id,
        request.parent_id,
        request.content.len()
    );

    // The gate runs before anything is written so a broke caller leaves no
    // half-recorded turn behind.
    profiles.check_balance(user_id).await?;

    let user_message = conversations
        .add_user_message(
            user_id,
            request.conversation_id,
            request.parent_id,
            Role::User,
            request.content,
            request.model.clone(),
        )
        .await?;
    let conversation_id = user_message.conversation_id;

    let context = conversations
        .build_context(user_id, conversation_id, None, None, None)
        .await?;

    let model = match request.model {
        Some(model) => model,
        None => {
            conversations
                .get_conversation(user_id, conversation_id)
                .await?
                .conversation
                .model
        }
    };

    let retry_attempts = settings.llm.retry_attempts;

    // Create SSE stream
    let stream = async_stream::stream! {
        // ===== EVENT 1: Session Info =====
        yield Ok(create_sse_event("session", &SessionInfo {
            conversation_id,
            branch_id: context.branch_id,
            user_message_id: user_message.id,
            timestamp: chrono::Utc::now(),
        }));

        // ===== EVENT 2: Generation starts =====
        yield Ok(create_sse_event("status", &StatusInfo {
            stage: "generating".to_string(),
            message: format!("Generating with {}...", model),
        }));

        let llm_messages: Vec<ChatMessage> =
            context.messages.iter().map(ChatMessage::from).collect();

        let mut token_stream =
            match acquire_stream(provider, model.clone(), llm_messages, retry_attempts).await {
                Ok(stream) => stream,
                Err(e) => {
                    yield Ok(create_sse_event("error", &ErrorInfo {
                        code: error_code(&e),
                        message: e.to_string(),
                    }));
                    return;
                }
            };

        // ===== EVENT 3: Stream AI Response =====
        use futures::StreamExt;

        let mut full_response = String::new();

        while let Some(result) = token_stream.next().await {
            match result {
                Ok(content) => {
                    if !content.is_empty() {
                        full_response.push_str(&content);
                        yield Ok(create_sse_event("message", &MessageChunk {
                            delta: content,
                        }));
                    }
                }
                Err(e) => {
                    // A broken generation is never persisted; the client
                    // retries against the unchanged tree.
                    warn!("Streaming aborted for conversation {}: {}", conversation_id, e);
                    yield Ok(create_sse_event("error", &ErrorInfo {
                        code: error_code(&e),
                        message: e.to_string(),
                    }));
                    return;
                }
            }
        }

        // ===== EVENT 4: Persist and complete =====
        let completion_tokens = TokenCounter::count_text(&full_response) as u32;
        let assistant = match conversations
            .save_assistant_message(
                user_id,
                conversation_id,
                Some(context.branch_id),
                Some(user_message.id),
                full_response,
                Some(model.clone()),
                Some(completion_tokens),
            )
            .await
        {
            Ok(message) => message,
            Err(e) => {
                yield Ok(create_sse_event("error", &ErrorInfo {
                    code: error_code(&e),
                    message: e.to_string(),
                }));
                return;
            }
        };

        let total_tokens = context.token_count as u32 + completion_tokens;
        if let Err(e) = profiles
            .record_spend(user_id, f64::from(total_tokens) / 1000.0)
            .await
        {
            warn!("Failed to record spend for user {}: {}", user_id, e);
        }

        let processing_time = start_time.elapsed().as_millis() as u64;

        yield Ok(create_sse_event("done", &CompletionInfo {
            conversation_id,
            branch_id: context.branch_id,
            assistant_message_id: assistant.id,
            token_count: completion_tokens,
            processing_time_ms: processing_time,
        }));

        info!("Chat completed in {}ms", processing_time);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Forks an alternate reply for an assistant message and streams the
/// replacement into the new branch.
pub async fn regenerate_stream_handler(
    Extension(conversations): Extension<Arc<ConversationService>>,
    Extension(profiles): Extension<Arc<ProfileService>>,
    Extension(provider): Extension<Arc<dyn CompletionProvider>>,
    Extension(settings): Extension<Arc<Settings>>,
    UserId(user_id): UserId,
    Json(request): Json<RegenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let start_time = Instant::now();

    info!(
        "Regenerate request: user={}, message={}",
        user_id, request.message_id
    );

    profiles.check_balance(user_id).await?;

    let branch = conversations
        .regenerate(user_id, request.message_id, request.branch_name)
        .await?;
    let conversation_id = branch.conversation_id;
    let Some(fork_message_id) = branch.parent_message_id else {
        return Err(ApiError::InternalInconsistency(format!(
            "regeneration branch {} has no fork point",
            branch.id
        )));
    };

    let context = conversations
        .build_context(user_id, conversation_id, Some(branch.id), None, None)
        .await?;

    let model = match request.model {
        Some(model) => model,
        None => {
            conversations
                .get_conversation(user_id, conversation_id)
                .await?
                .conversation
                .model
        }
    };

    let retry_attempts = settings.llm.retry_attempts;
    let branch_id = branch.id;

    let stream = async_stream::stream! {
        yield Ok(create_sse_event("session", &SessionInfo {
            conversation_id,
            branch_id,
            user_message_id: fork_message_id,
            timestamp: chrono::Utc::now(),
        }));

        yield Ok(create_sse_event("status", &StatusInfo {
            stage: "generating".to_string(),
            message: format!("Regenerating with {}...", model),
        }));

        let llm_messages: Vec<ChatMessage> =
            context.messages.iter().map(ChatMessage::from).collect();

        let mut token_stream =
            match acquire_stream(provider, model.clone(), llm_messages, retry_attempts).await {
                Ok(stream) => stream,
                Err(e) => {
                    yield Ok(create_sse_event("error", &ErrorInfo {
                        code: error_code(&e),
                        message: e.to_string(),
                    }));
                    return;
                }
            };

        use futures::StreamExt;

        let mut full_response = String::new();

        while let Some(result) = token_stream.next().await {
            match result {
                Ok(content) => {
                    if !content.is_empty() {
                        full_response.push_str(&content);
                        yield Ok(create_sse_event("message", &MessageChunk {
                            delta: content,
                        }));
                    }
                }
                Err(e) => {
                    warn!("Regeneration aborted for conversation {}: {}", conversation_id, e);
                    yield Ok(create_sse_event("error", &ErrorInfo {
                        code: error_code(&e),
                        message: e.to_string(),
                    }));
                    return;
                }
            }
        }

        let completion_tokens = TokenCounter::count_text(&full_response) as u32;
        let assistant = match conversations
            .save_assistant_message(
                user_id,
                conversation_id,
                Some(branch_id),
                Some(fork_message_id),
                full_response,
                Some(model.clone()),
                Some(completion_tokens),
            )
            .await
        {
            Ok(message) => message,
            Err(e) => {
                yield Ok(create_sse_event("error", &ErrorInfo {
                    code: error_code(&e),
                    message: e.to_string(),
                }));
                return;
            }
        };

        let total_tokens = context.token_count as u32 + completion_tokens;
        if let Err(e) = profiles
            .record_spend(user_id, f64::from(total_tokens) / 1000.0)
            .await
        {
            warn!("Failed to record spend for user {}: {}", user_id, e);
        }

        let processing_time = start_time.elapsed().as_millis() as u64;

        yield Ok(create_sse_event("done", &CompletionInfo {
            conversation_id,
            branch_id,
            assistant_message_id: assistant.id,
            token_count: completion_tokens,
            processing_time_ms: processing_time,
        }));

        info!("Regeneration completed in {}ms", processing_time);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Opens the completion stream, retrying transient upstream failures before
/// the first token only. Once data flows, failures surface to the client.
async fn acquire_stream(
    provider: Arc<dyn CompletionProvider>,
    model: String,
    messages: Vec<ChatMessage>,
    retry_attempts: u32,
) -> Result<TokenStream, ApiError> {
    let mut attempt = 0u32;
    loop {
        match provider.generate_stream(&model, messages.clone()).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                let transient = matches!(
                    e,
                    ApiError::UpstreamTimeout(_) | ApiError::UpstreamFailure(_)
                );
                if !transient || attempt >= retry_attempts {
                    return Err(e);
                }
                attempt += 1;
                warn!(
                    "LLM stream unavailable (attempt {}/{}): {}",
                    attempt, retry_attempts, e
                );
            }
        }
    }
}

fn error_code(error: &ApiError) -> String {
    match error {
        ApiError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
        ApiError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
        ApiError::BalanceInsufficient(_) => "BALANCE_INSUFFICIENT",
        ApiError::NotFound(_) => "NOT_FOUND",
        ApiError::InvalidParent(_) => "INVALID_PARENT",
        ApiError::InvalidBranch(_) => "INVALID_BRANCH",
        ApiError::LimitExceeded(_) => "LIMIT_EXCEEDED",
        _ => "INTERNAL_ERROR",
    }
    .to_string()
}

// Helper: Create SSE event
fn create_sse_event<T: serde::Serialize>(event_type: &str, data: &T) -> Event {
    Event::default()
        .event(event_type)
        .data(serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()))
}
