use axum::{extract::Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::services::cache::{CacheLayer, NS_MODELS};
use crate::services::CompletionProvider;
use crate::utils::error::ApiError;

#[derive(Serialize)]
pub struct ModelsResponse {
    models: Vec<String>,
    total: usize,
}

pub async fn list_models(
    Extension(provider): Extension<Arc<dyn CompletionProvider>>,
) -> Result<Json<ModelsResponse>, ApiError> {
    let models = provider.list_models().await?;
    let total = models.len();
    Ok(Json(ModelsResponse { models, total }))
}

/// Drops the cached model list and re-reads it from upstream.
pub async fn refresh_models(
    Extension(provider): Extension<Arc<dyn CompletionProvider>>,
    Extension(cache): Extension<Arc<CacheLayer>>,
) -> Result<Json<ModelsResponse>, ApiError> {
    cache.invalidate(NS_MODELS, "list").await;
    let models = provider.list_models().await?;
    info!("Model list refreshed: {} models", models.len());
    let total = models.len();
    Ok(Json(ModelsResponse { models, total }))
}
