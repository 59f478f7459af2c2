//! Greenroom session gateway.
//!
//! One public endpoint in front of many short-lived preview workers: the
//! gateway authenticates callers against the external policy store,
//! provisions a container + host port per session, proxies HTTP and
//! WebSocket traffic under `/preview/:sessionId`, accepts live file patches,
//! and reclaims idle sessions.

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    middleware as axum_middleware,
    routing::{any, get, patch, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

pub mod api;
pub mod auth;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod health;
pub mod middleware;
pub mod proxy;
pub mod session;
pub mod state;

pub use config::Config;
pub use state::AppState;

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.cors_origins.is_empty() {
        // No allowlist configured: mirror the caller (development).
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            config
                .cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
}

/// Assemble the full router. Split out of `main` so integration tests drive
/// the exact production stack.
pub fn build_router(state: Arc<AppState>) -> Router {
    // /api: rate limit runs at ingress, before the auth pipeline spends a
    // policy-store round trip on a flooding client. Bodies are capped and
    // responses compressed.
    let api = Router::new()
        .route("/preview/start", post(api::start_preview))
        .route("/preview", get(api::list_previews))
        .route("/preview/{session_id}", get(api::get_session))
        .route("/preview/{session_id}/file", patch(api::patch_file))
        .route("/preview/{session_id}/logs", get(api::get_logs))
        .route("/preview/{session_id}/ping", post(api::ping))
        .route("/preview/{session_id}/stop", post(api::stop))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::authenticate,
        ))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::api_rate_limit,
        ))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(CompressionLayer::new());

    // Proxied previews and the event hub: authenticated, but exempt from the
    // rate limit (asset storms must not starve the editor) and never
    // compressed; responses stream through untouched.
    let proxied = Router::new()
        .route("/preview/{session_id}", any(proxy::preview_entry))
        .route("/preview/{session_id}/{*rest}", any(proxy::preview_entry))
        .route("/ws", get(events::ws_endpoint))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::authenticate,
        ));

    let health = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .layer(CompressionLayer::new());

    Router::new()
        .merge(health)
        .nest("/api", api)
        .merge(proxied)
        .layer(axum_middleware::from_fn(middleware::request_context))
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
