use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared_types::ErrorBody;
use thiserror::Error;

/// Error taxonomy for every component. The HTTP edge maps each variant to a
/// status code and the JSON error envelope; internals never leak raw runtime
/// strings to clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("permission denied")]
    PermissionDenied { permission: String },

    #[error("access denied")]
    OwnershipDenied,

    #[error("quota exceeded")]
    QuotaExceeded { current: u64, limit: u64 },

    #[error("no available ports")]
    NoPorts,

    #[error("maximum sessions reached")]
    MaxSessions,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    /// Worker failed during session creation; carries a user-safe cause.
    #[error("preview failed to start: {0}")]
    StartFailed(String),

    #[error("upstream unavailable")]
    Upstream(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::PermissionDenied { .. } | GatewayError::OwnershipDenied => {
                StatusCode::FORBIDDEN
            }
            GatewayError::QuotaExceeded { .. }
            | GatewayError::NoPorts
            | GatewayError::MaxSessions
            | GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::StartFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the request id for the response envelope.
    pub fn with_request_id(self, request_id: impl Into<String>) -> ApiError {
        ApiError {
            kind: self,
            request_id: Some(request_id.into()),
        }
    }

    fn body(&self, request_id: Option<String>) -> ErrorBody {
        let mut body = ErrorBody {
            error: self.to_string(),
            message: None,
            request_id,
            current: None,
            limit: None,
            permission: None,
        };
        match self {
            GatewayError::QuotaExceeded { current, limit } => {
                body.current = Some(*current);
                body.limit = Some(*limit);
            }
            GatewayError::PermissionDenied { permission } => {
                body.permission = Some(permission.clone());
            }
            GatewayError::StartFailed(cause) => {
                body.message = Some(cause.clone());
            }
            GatewayError::Upstream(cause) => {
                body.message = Some(cause.clone());
            }
            // No detail beyond the request id; the cause goes to the log.
            GatewayError::Internal(_) => {}
            _ => {}
        }
        body
    }
}

/// A gateway error bound to the request it occurred in. Handlers construct
/// this via [`GatewayError::with_request_id`] so every error body carries the
/// id support needs.
#[derive(Debug)]
pub struct ApiError {
    pub kind: GatewayError,
    pub request_id: Option<String>,
}

impl From<GatewayError> for ApiError {
    fn from(kind: GatewayError) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(ref cause) = self.kind {
            tracing::error!(
                request_id = self.request_id.as_deref().unwrap_or("-"),
                "internal error: {cause:#}"
            );
        }
        let status = self.kind.status();
        let body = self.kind.body(self.request_id);
        (status, Json(body)).into_response()
    }
}
