use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    #[error("Invalid branch: {0}")]
    InvalidBranch(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Divergent root: {0}")]
    DivergentRoot(String),

    #[error("Insufficient balance: {0}")]
    BalanceInsufficient(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized", msg)
            }
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            ApiError::InvalidParent(msg) => {
                tracing::warn!("Invalid parent: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "InvalidParent", msg)
            }
            ApiError::InvalidBranch(msg) => {
                tracing::warn!("Invalid branch: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "InvalidBranch", msg)
            }
            ApiError::InvalidRole(msg) => {
                tracing::warn!("Invalid role: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "InvalidRole", msg)
            }
            ApiError::InvalidTarget(msg) => {
                tracing::warn!("Invalid target: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "InvalidTarget", msg)
            }
            ApiError::LimitExceeded(msg) => {
                tracing::warn!("Limit exceeded: {}", msg);
                (StatusCode::BAD_REQUEST, "LimitExceeded", msg)
            }
            ApiError::DivergentRoot(msg) => {
                tracing::warn!("Divergent root: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, "DivergentRoot", msg)
            }
            ApiError::BalanceInsufficient(msg) => {
                tracing::warn!("Insufficient balance: {}", msg);
                (StatusCode::PAYMENT_REQUIRED, "BalanceInsufficient", msg)
            }
            ApiError::UpstreamTimeout(msg) => {
                tracing::error!("Upstream timeout: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "UpstreamTimeout", msg)
            }
            ApiError::UpstreamFailure(msg) => {
                tracing::error!("Upstream failure: {}", msg);
                (StatusCode::BAD_GATEWAY, "UpstreamFailure", msg)
            }
            ApiError::InternalInconsistency(msg) => {
                tracing::error!("Internal inconsistency: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalInconsistency", msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
