//! REST handlers for the preview API.
//!
//! Every route here runs behind the authenticate middleware; handlers pull
//! the [`AuthContext`] and [`RequestContext`] extensions, run the
//! permission/ownership/quota checks their route declares, and delegate to
//! the session manager. Bodies with required fields are validated by hand so
//! a missing field is a 400, not a generic deserialization rejection.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared_types::{
    AckResponse, ListPreviewsResponse, LogsResponse, PatchFileRequest, StartPreviewRequest,
    StartPreviewResponse,
};

use crate::{
    auth::{
        enforce_quota, policy::QuotaClass, require_permission, require_session_access,
        AuthContext, PERM_PREVIEW_CREATE, PERM_PREVIEW_MANAGE,
    },
    error::{ApiError, GatewayError},
    middleware::RequestContext,
    session::Owner,
    AppState,
};

/// Default number of log lines pulled from the worker.
const DEFAULT_LOG_TAIL: usize = 100;

fn with_id(context: &RequestContext) -> impl Fn(GatewayError) -> ApiError + '_ {
    move |e| e.with_request_id(context.request_id.clone())
}

/// POST /api/preview/start
pub async fn start_preview(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(context): Extension<RequestContext>,
    Json(raw): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: StartPreviewRequest = serde_json::from_value(raw).map_err(|_| {
        with_id(&context)(GatewayError::Validation(
            "projectId and files are required".into(),
        ))
    })?;
    if body.project_id.trim().is_empty() {
        return Err(with_id(&context)(GatewayError::Validation(
            "projectId is required".into(),
        )));
    }

    require_permission(&state, &auth, &context, PERM_PREVIEW_CREATE)
        .await
        .map_err(with_id(&context))?;
    enforce_quota(&state, &auth, &context, QuotaClass::ConcurrentSessions)
        .await
        .map_err(with_id(&context))?;
    enforce_quota(&state, &auth, &context, QuotaClass::DailySessions)
        .await
        .map_err(with_id(&context))?;

    let owner = Owner {
        user_id: auth.user_id.clone(),
        org_id: auth.org_id.clone(),
        email: auth.email.clone(),
    };
    let session = state
        .sessions
        .create(owner, body.project_id, body.files)
        .await
        .map_err(with_id(&context))?;

    Ok(Json(StartPreviewResponse {
        success: true,
        session,
    }))
}

/// GET /api/preview: the caller's live sessions.
pub async fn list_previews(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    let sessions = state.sessions.list_for(&auth.user_id).await;
    Json(ListPreviewsResponse { sessions })
}

/// Checks shared by every `:sessionId` route: the session must exist (404
/// first), the caller must pass the ownership rule, and the route's declared
/// permission must hold.
async fn authorize_session(
    state: &Arc<AppState>,
    auth: &AuthContext,
    context: &RequestContext,
    session_id: &str,
) -> Result<(), GatewayError> {
    let owner = state
        .sessions
        .owner_of(session_id)
        .await
        .ok_or(GatewayError::NotFound("session"))?;
    require_session_access(state, auth, context, &owner.user_id, owner.org_id.as_deref())?;
    require_permission(state, auth, context, PERM_PREVIEW_MANAGE).await
}

/// GET /api/preview/:sessionId
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_session(&state, &auth, &context, &session_id)
        .await
        .map_err(with_id(&context))?;
    let summary = state
        .sessions
        .summary_of(&session_id)
        .await
        .ok_or_else(|| with_id(&context)(GatewayError::NotFound("session")))?;
    Ok(Json(summary))
}

/// PATCH /api/preview/:sessionId/file
pub async fn patch_file(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
    Json(raw): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let body: PatchFileRequest = serde_json::from_value(raw).map_err(|_| {
        with_id(&context)(GatewayError::Validation(
            "path and content are required".into(),
        ))
    })?;

    authorize_session(&state, &auth, &context, &session_id)
        .await
        .map_err(with_id(&context))?;
    state
        .sessions
        .patch_file(&session_id, &body.path, body.content)
        .await
        .map_err(with_id(&context))?;
    Ok(Json(AckResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub since: Option<String>,
}

/// GET /api/preview/:sessionId/logs?since=ISO
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let since: Option<DateTime<Utc>> = match query.since.as_deref() {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| {
                    with_id(&context)(GatewayError::Validation(
                        "since must be an ISO-8601 timestamp".into(),
                    ))
                })?,
        ),
        None => None,
    };

    authorize_session(&state, &auth, &context, &session_id)
        .await
        .map_err(with_id(&context))?;
    let logs = state
        .sessions
        .logs(&session_id, since, DEFAULT_LOG_TAIL)
        .await
        .map_err(with_id(&context))?;
    Ok(Json(LogsResponse {
        logs,
        has_more: false,
    }))
}

/// POST /api/preview/:sessionId/ping
pub async fn ping(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_session(&state, &auth, &context, &session_id)
        .await
        .map_err(with_id(&context))?;
    if !state.sessions.ping(&session_id).await {
        return Err(with_id(&context)(GatewayError::NotFound("session")));
    }
    Ok(Json(AckResponse::ok()))
}

/// POST /api/preview/:sessionId/stop. Idempotent; stopping a session that
/// is already gone succeeds.
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Extension(context): Extension<RequestContext>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(owner) = state.sessions.owner_of(&session_id).await {
        require_session_access(&state, &auth, &context, &owner.user_id, owner.org_id.as_deref())
            .map_err(with_id(&context))?;
        require_permission(&state, &auth, &context, PERM_PREVIEW_MANAGE)
            .await
            .map_err(with_id(&context))?;
        state
            .sessions
            .stop(&session_id)
            .await
            .map_err(with_id(&context))?;
    }
    Ok(Json(AckResponse::ok()))
}
