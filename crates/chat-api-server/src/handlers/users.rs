use axum::{extract::Extension, Json};
use std::sync::Arc;

use crate::security::UserId;
use crate::services::ProfileService;
use crate::store::models::UserProfile;
use crate::utils::error::ApiError;

pub async fn get_profile(
    Extension(profiles): Extension<Arc<ProfileService>>,
    UserId(user_id): UserId,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = profiles.get_profile(user_id).await?;
    Ok(Json(profile))
}
