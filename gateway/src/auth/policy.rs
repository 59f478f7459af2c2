//! Typed client for the external policy store.
//!
//! The policy store is the system of record for identities, API keys,
//! permissions, quotas, and security events. The gateway persists nothing
//! itself; every durable read or write goes through this client. The trait
//! boundary exists so tests substitute an in-memory stub.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An API key record as the policy store returns it for a digest lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

/// Primary organization membership resolved for a bearer-token user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub organization_id: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUser {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub membership: Option<Membership>,
}

/// Quota classes the gateway checks before allocating resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaClass {
    ConcurrentSessions,
    DailySessions,
}

impl QuotaClass {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaClass::ConcurrentSessions => "concurrent_sessions",
            QuotaClass::DailySessions => "daily_sessions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    pub current: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    LoginFailure,
    PermissionDenied,
    RateLimitExceeded,
    SuspiciousActivity,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::LoginFailure => "login_failure",
            SecurityEventKind::PermissionDenied => "permission_denied",
            SecurityEventKind::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// A security event as written to the policy store. Writes are best-effort;
/// a failed write never blocks the primary response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub request_id: String,
    pub path: String,
    pub method: String,
    pub risk_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Look up an API key by its SHA-256 hex digest.
    async fn lookup_api_key(&self, digest: &str) -> anyhow::Result<Option<ApiKeyRecord>>;

    /// Record key usage: last-used timestamp, source IP, request counter.
    async fn touch_api_key(&self, key_id: &str, ip: IpAddr) -> anyhow::Result<()>;

    /// Verify a bearer token with the identity provider and resolve the
    /// user's primary organization membership.
    async fn verify_bearer(&self, token: &str) -> anyhow::Result<Option<VerifiedUser>>;

    /// Ask the store whether `user_id` holds `permission` beyond what the
    /// credential itself carries.
    async fn check_permission(&self, user_id: &str, permission: &str) -> anyhow::Result<bool>;

    /// Check-and-commit a quota increment for a tenant.
    async fn check_quota(
        &self,
        tenant: &str,
        class: QuotaClass,
        increment: u32,
    ) -> anyhow::Result<QuotaDecision>;

    async fn record_event(&self, event: SecurityEvent) -> anyhow::Result<()>;
}

/// HTTP implementation against the policy store's internal API.
pub struct HttpPolicyClient {
    base_url: String,
    service_key: Option<String>,
    http: reqwest::Client,
}

impl HttpPolicyClient {
    pub fn new(base_url: String, service_key: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.post(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.service_key {
            req = req.header("x-service-key", key);
        }
        req
    }
}

#[async_trait]
impl PolicyStore for HttpPolicyClient {
    async fn lookup_api_key(&self, digest: &str) -> anyhow::Result<Option<ApiKeyRecord>> {
        let res = self
            .post("/internal/api-keys/lookup")
            .json(&serde_json::json!({ "keyHash": digest }))
            .send()
            .await?;
        match res.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(res.json().await?)),
            status => anyhow::bail!("api key lookup returned {status}"),
        }
    }

    async fn touch_api_key(&self, key_id: &str, ip: IpAddr) -> anyhow::Result<()> {
        self.post(&format!("/internal/api-keys/{key_id}/touch"))
            .json(&serde_json::json!({ "ip": ip.to_string() }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn verify_bearer(&self, token: &str) -> anyhow::Result<Option<VerifiedUser>> {
        let res = self
            .post("/internal/auth/verify")
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;
        match res.status() {
            reqwest::StatusCode::UNAUTHORIZED => Ok(None),
            status if status.is_success() => Ok(Some(res.json().await?)),
            status => anyhow::bail!("token verification returned {status}"),
        }
    }

    async fn check_permission(&self, user_id: &str, permission: &str) -> anyhow::Result<bool> {
        #[derive(Deserialize)]
        struct CheckResponse {
            allowed: bool,
        }
        let res: CheckResponse = self
            .post("/internal/permissions/check")
            .json(&serde_json::json!({ "userId": user_id, "permission": permission }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(res.allowed)
    }

    async fn check_quota(
        &self,
        tenant: &str,
        class: QuotaClass,
        increment: u32,
    ) -> anyhow::Result<QuotaDecision> {
        let res = self
            .post("/internal/quotas/check")
            .json(&serde_json::json!({
                "tenant": tenant,
                "class": class.as_str(),
                "increment": increment,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(res)
    }

    async fn record_event(&self, event: SecurityEvent) -> anyhow::Result<()> {
        self.post("/internal/security-events")
            .json(&event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
