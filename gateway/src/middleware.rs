use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use rand::{distr::Alphanumeric, Rng};
use tracing::Instrument;

use crate::{
    auth::policy::{RiskLevel, SecurityEventKind},
    auth::{emit_security_event, SecurityEventParams},
    error::GatewayError,
    AppState,
};

/// Per-request metadata minted at ingress. Every handler and every security
/// event reads from this; the request id also lands on the tracing span and
/// the `x-request-id` response header.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: IpAddr,
    pub user_agent: Option<String>,
    pub path: String,
    pub method: String,
}

pub fn mint_request_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("req_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// First `X-Forwarded-For` value when present (we sit behind the load
/// balancer), else the socket peer address.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Outermost middleware: mint the request id, record request metadata, and
/// echo the id back on the response.
pub async fn request_context(req: Request, next: Next) -> Response {
    let context = RequestContext {
        request_id: mint_request_id(),
        client_ip: client_ip(&req),
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        path: req.uri().path().to_string(),
        method: req.method().to_string(),
    };
    let request_id = context.request_id.clone();

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %context.method,
        path = %context.path,
    );

    let mut req = req;
    req.extensions_mut().insert(context);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Keyed token buckets, one per client IP.
pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub fn build_rate_limiter(requests_per_minute: u32) -> Arc<IpRateLimiter> {
    let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());
    Arc::new(RateLimiter::keyed(quota))
}

/// Per-IP rate limit, layered onto `/api` routes only. Proxied preview
/// traffic is exempt so asset storms cannot starve the editor, and health
/// probes never touch it.
pub async fn api_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let context = req.extensions().get::<RequestContext>().cloned();
    let ip = context
        .as_ref()
        .map(|c| c.client_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if state.rate.check_key(&ip).is_err() {
        if let Some(context) = &context {
            emit_security_event(
                &state,
                SecurityEventParams {
                    kind: SecurityEventKind::RateLimitExceeded,
                    risk: RiskLevel::Low,
                    user_id: None,
                    user_email: None,
                    organization_id: None,
                    detail: None,
                },
                context,
            );
        }
        let request_id = context.map(|c| c.request_id).unwrap_or_default();
        return GatewayError::RateLimited
            .with_request_id(request_id)
            .into_response();
    }

    next.run(req).await
}
