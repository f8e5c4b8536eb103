use anyhow::Result;
use axum::{
    routing::{get, patch, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::{debug, info};

use chat_api_server::config::settings::Settings;
use chat_api_server::handlers;
use chat_api_server::services::cache::CacheLayer;
use chat_api_server::services::{
    CompletionProvider, ConversationService, LlmService, ProfileService,
};
use chat_api_server::store::{ConversationStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,chat_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("🚀 Starting Chat API Server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize storage
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
    info!("✅ Conversation store ready");

    // Initialize cache (redis primary with in-process fallback, or
    // in-process only)
    let cache = Arc::new(CacheLayer::from_config(&settings.cache));
    info!("✅ Cache layer ready: {}", cache.health().await.backend);

    // Initialize services
    let llm_service = Arc::new(LlmService::new(settings.llm.clone(), cache.clone()));
    let provider: Arc<dyn CompletionProvider> = llm_service;

    let conversation_service = Arc::new(ConversationService::new(
        store.clone(),
        cache.clone(),
        &settings,
    ));

    let profile_service = Arc::new(ProfileService::new(store.clone(), cache.clone()));

    // Periodic sweep of expired in-process cache entries
    let sweeper = cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let swept = sweeper.cleanup_expired();
            if swept > 0 {
                debug!("Swept {} expired cache entries", swept);
            }
        }
    });
    info!("✅ Cache sweeper started");

    let settings = Arc::new(settings);

    // Build router
    let app = build_router(
        conversation_service,
        profile_service,
        provider,
        store,
        cache,
        settings.clone(),
    );

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_router(
    conversation_service: Arc<ConversationService>,
    profile_service: Arc<ProfileService>,
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn ConversationStore>,
    cache: Arc<CacheLayer>,
    settings: Arc<Settings>,
) -> Router {
    // Public routes (no identity required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    // Protected routes (x-user-id installed by the gateway)
    let protected_routes = Router::new()
        .route("/v1/chat", post(handlers::chat::chat_stream_handler))
        .route(
            "/v1/chat/regenerate",
            post(handlers::chat::regenerate_stream_handler),
        )
        .route(
            "/v1/conversations",
            get(handlers::conversations::list_conversations)
                .post(handlers::conversations::create_conversation),
        )
        .route(
            "/v1/conversations/{conversation_id}",
            get(handlers::conversations::get_conversation)
                .patch(handlers::conversations::update_conversation)
                .delete(handlers::conversations::delete_conversation),
        )
        .route(
            "/v1/conversations/{conversation_id}/context",
            get(handlers::conversations::build_context),
        )
        .route(
            "/v1/conversations/{conversation_id}/branches",
            get(handlers::branches::list_branches).post(handlers::branches::create_branch),
        )
        .route(
            "/v1/conversations/{conversation_id}/branches/{branch_id}",
            patch(handlers::branches::rename_branch).delete(handlers::branches::abandon_branch),
        )
        .route(
            "/v1/conversations/{conversation_id}/branches/{branch_id}/activate",
            post(handlers::branches::activate_branch),
        )
        .route(
            "/v1/conversations/{conversation_id}/branches/{branch_id}/messages",
            get(handlers::branches::branch_messages),
        )
        .route(
            "/v1/conversations/{conversation_id}/branches/{branch_id}/merge",
            post(handlers::branches::merge_branch),
        )
        .route("/v1/messages", post(handlers::messages::add_message))
        .route(
            "/v1/messages/{message_id}",
            get(handlers::messages::get_message).patch(handlers::messages::edit_message),
        )
        .route(
            "/v1/messages/{message_id}/thread",
            get(handlers::messages::get_thread),
        )
        .route(
            "/v1/messages/{message_id}/children",
            get(handlers::messages::get_children),
        )
        .route(
            "/v1/messages/{message_id}/siblings",
            get(handlers::messages::get_siblings),
        )
        .route("/v1/models", get(handlers::models::list_models))
        .route("/v1/models/refresh", post(handlers::models::refresh_models))
        .route("/v1/users/me", get(handlers::users::get_profile));

    // Combine routes
    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        // Shared state
        .layer(Extension(conversation_service))
        .layer(Extension(profile_service))
        .layer(Extension(provider))
        .layer(Extension(store))
        .layer(Extension(cache))
        .layer(Extension(settings))
        // CORS
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}
