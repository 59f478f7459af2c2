//! Wire types shared between the gateway and the editor frontend
//!
//! Everything here crosses the HTTP or WebSocket boundary, so the JSON field
//! names are fixed (camelCase) and nothing depends on gateway internals.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Session lifecycle
// ============================================================================

/// Lifecycle state of a preview session.
///
/// ```text
/// pending ──► starting ──► running ──► stopping ──► stopped
///      │           │           │
///      └───────────┴───────────┴──► error ──► stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl SessionStatus {
    /// Whether `next` is a legal direct successor of `self`.
    pub fn may_advance_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, Starting) | (Starting, Running) | (Running, Stopping) => true,
            (Stopping, Stopped) => true,
            // Early stop before the worker ever came up.
            (Pending, Stopping) | (Starting, Stopping) => true,
            // Fault from any non-terminal state; faults drain through stopping.
            (Pending, Error) | (Starting, Error) | (Running, Error) => true,
            (Error, Stopping) | (Error, Stopped) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Client-facing view of a session. Never exposes the container handle or the
/// allocated host port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub project_id: String,
    pub status: SessionStatus,
    pub iframe_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

// ============================================================================
// REST API bodies
// ============================================================================

/// POST /api/preview/start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPreviewRequest {
    pub project_id: String,
    /// Relative path → file content.
    #[serde(default)]
    pub files: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPreviewResponse {
    pub success: bool,
    pub session: SessionSummary,
}

/// PATCH /api/preview/:sessionId/file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchFileRequest {
    pub path: String,
    pub content: String,
}

/// GET /api/preview/:sessionId/logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub logs: Vec<String>,
    pub has_more: bool,
}

/// GET /api/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPreviewsResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Generic `{ "success": true }` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Error envelope for every 4xx/5xx body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Present on quota rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Present on permission rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

// ============================================================================
// Event hub frames
// ============================================================================

/// Frames the client sends on `/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubRequest {
    #[serde(rename_all = "camelCase")]
    Subscribe { session_id: String },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { session_id: String },
    Ping,
}

/// Frames the gateway pushes to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    Pong,
    #[serde(rename_all = "camelCase")]
    SessionStatus {
        session_id: String,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SessionLog {
        session_id: String,
        line: String,
    },
}
