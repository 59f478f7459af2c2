//! Auth pipeline: credential resolution, permission checks, session
//! ownership, security-event emission.
//!
//! Two credential modes are accepted, in order: `x-api-key` (SHA-256 digest
//! looked up in the policy store), then `Authorization: Bearer` (verified by
//! the identity provider). Auth failures fail closed; quota-RPC failures fail
//! open (see [`enforce_quota`]).

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    error::GatewayError,
    middleware::RequestContext,
    AppState,
};

pub mod policy;

use policy::{QuotaClass, RiskLevel, SecurityEvent, SecurityEventKind};

pub const PERM_PREVIEW_CREATE: &str = "preview:create";
pub const PERM_PREVIEW_MANAGE: &str = "preview:manage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    Bearer,
    DevBypass,
}

/// The authenticated caller, attached to request extensions by
/// [`authenticate`] and read by every protected handler.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
    pub org_id: Option<String>,
    pub role: Option<String>,
    pub scopes: Vec<String>,
    pub method: AuthMethod,
}

impl AuthContext {
    /// Tenant key for quota accounting: organization, falling back to user.
    pub fn tenant(&self) -> &str {
        self.org_id.as_deref().unwrap_or(&self.user_id)
    }

    fn role_is_elevated(&self) -> bool {
        matches!(self.role.as_deref(), Some("owner") | Some("admin"))
    }

    /// Grants decidable from the credential alone, without a policy RPC.
    pub fn holds_locally(&self, permission: &str) -> bool {
        self.scopes.iter().any(|s| s == "*")
            || self.role_is_elevated()
            || self.scopes.iter().any(|s| s == permission)
    }

    /// Whether the caller is owner/admin of the given organization.
    pub fn elevated_in_org(&self, org_id: &str) -> bool {
        self.org_id.as_deref() == Some(org_id) && self.role_is_elevated()
    }
}

/// SHA-256 hex digest of an API key; only the digest ever leaves the gateway.
pub fn api_key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub struct SecurityEventParams {
    pub kind: SecurityEventKind,
    pub risk: RiskLevel,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub organization_id: Option<String>,
    pub detail: Option<serde_json::Value>,
}

/// Fire-and-forget security event write. Failures are logged and swallowed;
/// the primary response never waits on the policy store.
pub fn emit_security_event(
    state: &Arc<AppState>,
    params: SecurityEventParams,
    context: &RequestContext,
) {
    let event = SecurityEvent {
        kind: params.kind.as_str().to_string(),
        user_id: params.user_id,
        user_email: params.user_email,
        organization_id: params.organization_id,
        ip: context.client_ip.to_string(),
        user_agent: context.user_agent.clone(),
        request_id: context.request_id.clone(),
        path: context.path.clone(),
        method: context.method.clone(),
        risk_level: params.risk.as_str().to_string(),
        detail: params.detail,
    };
    let policy = Arc::clone(&state.policy);
    tokio::spawn(async move {
        if let Err(e) = policy.record_event(event).await {
            debug!("security event write failed: {e}");
        }
    });
}

fn auth_failure(
    state: &Arc<AppState>,
    context: &RequestContext,
    reason: &str,
) -> Response {
    emit_security_event(
        state,
        SecurityEventParams {
            kind: SecurityEventKind::LoginFailure,
            risk: RiskLevel::Medium,
            user_id: None,
            user_email: None,
            organization_id: None,
            detail: Some(serde_json::json!({ "reason": reason })),
        },
        context,
    );
    GatewayError::Unauthorized(reason.to_string())
        .with_request_id(context.request_id.clone())
        .into_response()
}

/// Middleware guarding every authenticated route. Resolves the caller and
/// inserts an [`AuthContext`] extension, or responds 401.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let context = match req.extensions().get::<RequestContext>() {
        Some(c) => c.clone(),
        None => {
            // Request-context layer missing is a wiring bug, not a client error.
            return GatewayError::Internal(anyhow::anyhow!("request context missing"))
                .with_request_id(String::new())
                .into_response();
        }
    };

    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string());

    let auth = if let Some(key) = api_key {
        let digest = api_key_digest(&key);
        match state.policy.lookup_api_key(&digest).await {
            Ok(Some(record)) if record.is_usable(chrono::Utc::now()) => {
                // Usage bookkeeping is non-fatal by contract.
                let policy = Arc::clone(&state.policy);
                let key_id = record.id.clone();
                let ip = context.client_ip;
                tokio::spawn(async move {
                    if let Err(e) = policy.touch_api_key(&key_id, ip).await {
                        debug!("api key usage update failed: {e}");
                    }
                });
                AuthContext {
                    user_id: record.user_id,
                    email: record.email,
                    org_id: record.organization_id,
                    role: None,
                    scopes: record.scopes,
                    method: AuthMethod::ApiKey,
                }
            }
            Ok(Some(_)) => return auth_failure(&state, &context, "api key expired or inactive"),
            Ok(None) => return auth_failure(&state, &context, "invalid api key"),
            Err(e) => {
                warn!(request_id = %context.request_id, "api key lookup failed: {e}");
                return auth_failure(&state, &context, "authentication unavailable");
            }
        }
    } else if let Some(token) = bearer {
        match state.policy.verify_bearer(&token).await {
            Ok(Some(user)) => {
                let (org_id, role, permissions) = match user.membership {
                    Some(m) => (Some(m.organization_id), Some(m.role), m.permissions),
                    None => (None, None, vec![]),
                };
                AuthContext {
                    user_id: user.user_id,
                    email: user.email,
                    org_id,
                    role,
                    scopes: permissions,
                    method: AuthMethod::Bearer,
                }
            }
            Ok(None) => return auth_failure(&state, &context, "invalid or expired token"),
            Err(e) => {
                warn!(request_id = %context.request_id, "token verification failed: {e}");
                return auth_failure(&state, &context, "authentication unavailable");
            }
        }
    } else if state.config.dev_bypass_active() {
        AuthContext {
            user_id: "dev-user".to_string(),
            email: None,
            org_id: None,
            role: None,
            scopes: vec!["*".to_string()],
            method: AuthMethod::DevBypass,
        }
    } else {
        return auth_failure(&state, &context, "missing credentials");
    };

    req.extensions_mut().insert(auth);
    next.run(req).await
}

/// Route-level permission check: local grant, or a policy RPC as the final
/// word. Authorization fails closed when the store is unreachable.
pub async fn require_permission(
    state: &Arc<AppState>,
    auth: &AuthContext,
    context: &RequestContext,
    permission: &str,
) -> Result<(), GatewayError> {
    if auth.holds_locally(permission) {
        return Ok(());
    }

    let confirmed = match state.policy.check_permission(&auth.user_id, permission).await {
        Ok(allowed) => allowed,
        Err(e) => {
            warn!(request_id = %context.request_id, "permission check failed: {e}");
            false
        }
    };
    if confirmed {
        return Ok(());
    }

    emit_security_event(
        state,
        SecurityEventParams {
            kind: SecurityEventKind::PermissionDenied,
            risk: RiskLevel::Medium,
            user_id: Some(auth.user_id.clone()),
            user_email: auth.email.clone(),
            organization_id: auth.org_id.clone(),
            detail: Some(serde_json::json!({ "permission": permission })),
        },
        context,
    );
    Err(GatewayError::PermissionDenied {
        permission: permission.to_string(),
    })
}

/// Quota check-and-commit before resource-allocating routes. A policy-store
/// failure fails open: a broken quota service must not take previews down
/// with it, and the warning carries the request id for support.
pub async fn enforce_quota(
    state: &Arc<AppState>,
    auth: &AuthContext,
    context: &RequestContext,
    class: QuotaClass,
) -> Result<(), GatewayError> {
    match state.policy.check_quota(auth.tenant(), class, 1).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => Err(GatewayError::QuotaExceeded {
            current: decision.current,
            limit: decision.limit,
        }),
        Err(e) => {
            warn!(
                request_id = %context.request_id,
                class = class.as_str(),
                "quota check failed, proceeding: {e}"
            );
            Ok(())
        }
    }
}

/// Ownership gate for every `:sessionId` route: the session's owner, or an
/// owner/admin of its organization. Violations are suspicious by definition.
pub fn require_session_access(
    state: &Arc<AppState>,
    auth: &AuthContext,
    context: &RequestContext,
    owner_user_id: &str,
    owner_org_id: Option<&str>,
) -> Result<(), GatewayError> {
    if owner_user_id == auth.user_id {
        return Ok(());
    }
    if let Some(org_id) = owner_org_id {
        if auth.elevated_in_org(org_id) {
            return Ok(());
        }
    }

    emit_security_event(
        state,
        SecurityEventParams {
            kind: SecurityEventKind::SuspiciousActivity,
            risk: RiskLevel::High,
            user_id: Some(auth.user_id.clone()),
            user_email: auth.email.clone(),
            organization_id: auth.org_id.clone(),
            detail: Some(serde_json::json!({ "sessionOwner": owner_user_id })),
        },
        context,
    );
    Err(GatewayError::OwnershipDenied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(scopes: &[&str], role: Option<&str>, org: Option<&str>) -> AuthContext {
        AuthContext {
            user_id: "u1".into(),
            email: None,
            org_id: org.map(str::to_string),
            role: role.map(str::to_string),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            method: AuthMethod::ApiKey,
        }
    }

    #[test]
    fn digest_is_sha256_hex() {
        // echo -n "secret" | sha256sum
        assert_eq!(
            api_key_digest("secret"),
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
        assert_eq!(api_key_digest("secret").len(), 64);
    }

    #[test]
    fn wildcard_scope_grants_everything() {
        assert!(auth(&["*"], None, None).holds_locally(PERM_PREVIEW_CREATE));
    }

    #[test]
    fn elevated_roles_grant_everything() {
        assert!(auth(&[], Some("owner"), Some("o1")).holds_locally(PERM_PREVIEW_MANAGE));
        assert!(auth(&[], Some("admin"), Some("o1")).holds_locally(PERM_PREVIEW_MANAGE));
        assert!(!auth(&[], Some("member"), Some("o1")).holds_locally(PERM_PREVIEW_MANAGE));
    }

    #[test]
    fn explicit_scope_grants_only_itself() {
        let context = auth(&[PERM_PREVIEW_CREATE], None, None);
        assert!(context.holds_locally(PERM_PREVIEW_CREATE));
        assert!(!context.holds_locally(PERM_PREVIEW_MANAGE));
    }

    #[test]
    fn tenant_prefers_org() {
        assert_eq!(auth(&[], None, Some("o1")).tenant(), "o1");
        assert_eq!(auth(&[], None, None).tenant(), "u1");
    }

    #[test]
    fn org_elevation_requires_matching_org() {
        let context = auth(&[], Some("admin"), Some("o1"));
        assert!(context.elevated_in_org("o1"));
        assert!(!context.elevated_in_org("o2"));
        assert!(!auth(&[], Some("member"), Some("o1")).elevated_in_org("o1"));
    }
}
