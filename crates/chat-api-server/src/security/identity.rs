use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::utils::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity. The upstream gateway authenticates the request and
/// installs the `x-user-id` header; a request without it is rejected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing x-user-id header".to_string()))?;
        let user_id = raw
            .parse::<Uuid>()
            .map_err(|_| ApiError::Unauthorized("malformed x-user-id header".to_string()))?;
        Ok(UserId(user_id))
    }
}
