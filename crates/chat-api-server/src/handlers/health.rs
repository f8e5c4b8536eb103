use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::services::cache::{CacheHealth, CacheLayer, CacheStatsSnapshot};
use crate::store::ConversationStore;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: String,
    store: String,
    cache: CacheHealth,
    cache_stats: CacheStatsSnapshot,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// The store is required; the cache reports degraded without failing
/// readiness because every read falls back to the in-process copy.
pub async fn readiness_check(
    Extension(store): Extension<Arc<dyn ConversationStore>>,
    Extension(cache): Extension<Arc<CacheLayer>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let store_status = match store.ping().await {
        Ok(()) => "up".to_string(),
        Err(e) => {
            warn!("Store ping failed: {}", e);
            "down".to_string()
        }
    };

    let cache_health = cache.health().await;
    let ready = store_status == "up";
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            store: store_status,
            cache: cache_health,
            cache_stats: cache.stats(),
        }),
    )
}
