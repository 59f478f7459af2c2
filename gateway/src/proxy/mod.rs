//! Proxy engine: forwards everything under `/preview/:sessionId` to the
//! session's worker, HTTP and WebSocket alike.
//!
//! The prefix is stripped before forwarding, so the dev server sees the
//! paths it expects. Responses stream back unmodified; WebSocket upgrades
//! (the HMR channel) are piped frame-by-frame in both directions with no
//! buffering beyond the socket itself.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ws, Request, State, WebSocketUpgrade},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error};

use crate::{
    auth::{require_session_access, AuthContext},
    error::GatewayError,
    middleware::RequestContext,
    AppState,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Split `/preview/<id>[/rest]` into the session id and the forward path.
pub fn split_preview_path(path: &str) -> Option<(&str, String)> {
    let rest = path.strip_prefix("/preview/")?;
    let (id, tail) = match rest.split_once('/') {
        Some((id, tail)) => (id, format!("/{tail}")),
        None => (rest, "/".to_string()),
    };
    if id.is_empty() {
        return None;
    }
    Some((id, tail))
}

/// Entry point for `/preview/{sessionId}` and `/preview/{sessionId}/{*rest}`,
/// any method. Auth ran in middleware; ownership is evaluated here because
/// the session must be resolved first.
pub async fn preview_entry(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let context = match req.extensions().get::<RequestContext>() {
        Some(c) => c.clone(),
        None => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let auth = req.extensions().get::<AuthContext>().cloned();

    let Some((session_id, forward_path)) = split_preview_path(req.uri().path()) else {
        return GatewayError::NotFound("session")
            .with_request_id(context.request_id.clone())
            .into_response();
    };
    let session_id = session_id.to_string();

    let Some(owner) = state.sessions.owner_of(&session_id).await else {
        return GatewayError::NotFound("session")
            .with_request_id(context.request_id.clone())
            .into_response();
    };
    if let Some(auth) = &auth {
        if let Err(e) = require_session_access(
            &state,
            auth,
            &context,
            &owner.user_id,
            owner.org_id.as_deref(),
        ) {
            return e.with_request_id(context.request_id.clone()).into_response();
        }
    }

    // `port_of` also refreshes activity, so a preview someone is actually
    // looking at never gets idle-reaped under them.
    let Some(port) = state.sessions.port_of(&session_id).await else {
        return GatewayError::NotFound("session")
            .with_request_id(context.request_id.clone())
            .into_response();
    };

    let forward = match req.uri().query() {
        Some(query) => format!("{forward_path}?{query}"),
        None => forward_path,
    };

    let is_ws = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let req = scrub_proxy_request(req, &context);

    if is_ws {
        return proxy_ws_raw(req, port, forward).await;
    }
    proxy_http(req, port, forward).await
}

/// Never forward client credentials into the worker, and stamp the
/// X-Forwarded-* chain the dev server may want for absolute URLs.
fn scrub_proxy_request(req: Request, context: &RequestContext) -> Request {
    let (mut parts, body) = req.into_parts();

    parts.headers.remove(header::COOKIE);
    parts.headers.remove(header::AUTHORIZATION);
    parts.headers.remove(header::PROXY_AUTHORIZATION);
    parts.headers.remove("x-api-key");

    let forwarded_for = match parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{existing}, {}", context.client_ip),
        None => context.client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        parts.headers.insert("x-forwarded-for", value);
    }
    if !parts.headers.contains_key("x-forwarded-proto") {
        parts
            .headers
            .insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if let Some(host) = parts.headers.get(header::HOST).cloned() {
        parts.headers.insert("x-forwarded-host", host);
    }

    Request::from_parts(parts, body)
}

/// Forward an HTTP request to the worker on `target_port`, rewriting the URI
/// to the stripped path.
pub async fn proxy_http(req: Request, target_port: u16, path_and_query: String) -> Response {
    let target_uri = match Uri::builder()
        .scheme("http")
        .authority(format!("127.0.0.1:{target_port}"))
        .path_and_query(path_and_query.as_str())
        .build()
    {
        Ok(u) => u,
        Err(e) => {
            error!("bad proxy URI: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    debug!(%target_uri, "proxying HTTP request");

    let connect = tokio::time::timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect(format!("127.0.0.1:{target_port}")),
    )
    .await;
    let stream = match connect {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            error!(target_port, "worker unreachable: {e}");
            return (StatusCode::BAD_GATEWAY, "preview worker unreachable").into_response();
        }
        Err(_) => {
            error!(target_port, "worker connect timed out");
            return (StatusCode::BAD_GATEWAY, "preview worker timed out").into_response();
        }
    };

    let io = TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(c) => c,
        Err(e) => {
            error!("HTTP/1.1 handshake failed: {e}");
            return (StatusCode::BAD_GATEWAY, "preview worker unreachable").into_response();
        }
    };

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("proxy connection closed: {e}");
        }
    });

    let (parts, body) = req.into_parts();
    let mut proxy_req = hyper::Request::from_parts(parts, body);
    *proxy_req.uri_mut() = target_uri;

    // Remove hop-by-hop headers before forwarding.
    proxy_req.headers_mut().remove(header::CONNECTION);
    proxy_req.headers_mut().remove("proxy-connection");
    proxy_req.headers_mut().remove("keep-alive");
    proxy_req.headers_mut().remove(header::TE);
    proxy_req.headers_mut().remove(header::TRAILER);
    proxy_req.headers_mut().remove(header::TRANSFER_ENCODING);
    proxy_req.headers_mut().remove(header::UPGRADE);

    // The worker must see itself as the authority.
    proxy_req.headers_mut().insert(
        header::HOST,
        HeaderValue::from_str(&format!("127.0.0.1:{target_port}"))
            .unwrap_or_else(|_| HeaderValue::from_static("localhost")),
    );

    match sender.send_request(proxy_req).await {
        Ok(resp) => {
            let (parts, body) = resp.into_parts();
            let body = Body::new(
                body.map_err(|e| std::io::Error::other(e.to_string()))
                    .boxed_unsync(),
            );
            Response::from_parts(parts, body)
        }
        Err(e) => {
            error!("proxy request failed: {e}");
            (StatusCode::BAD_GATEWAY, "preview worker failed").into_response()
        }
    }
}

type WorkerSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Complete a WebSocket upgrade end-to-end. The worker handshake happens
/// first, carrying the subprotocols the browser offered, so the 101 we send
/// back echoes whatever the worker selected. Vite's HMR client connects with
/// the `vite-hmr` subprotocol and drops the socket if the upgrade response
/// does not confirm it.
pub async fn proxy_ws(
    ws: WebSocketUpgrade,
    target_port: u16,
    path: String,
    offered_protocols: Option<String>,
) -> Response {
    use tokio_tungstenite::{connect_async, tungstenite::client::IntoClientRequest};

    let target_url = format!("ws://127.0.0.1:{target_port}{path}");
    debug!(%target_url, "proxying WebSocket upgrade");

    let mut worker_req = match target_url.clone().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            error!(%target_url, "bad worker WS URL: {e}");
            return (StatusCode::BAD_GATEWAY, "preview worker unreachable").into_response();
        }
    };
    if let Some(offered) = offered_protocols
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        worker_req
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, offered);
    }

    let (worker_ws, worker_response) = match connect_async(worker_req).await {
        Ok(c) => c,
        Err(e) => {
            error!(%target_url, "WS connect to worker failed: {e}");
            return (StatusCode::BAD_GATEWAY, "preview worker unreachable").into_response();
        }
    };

    let upgrade = match worker_response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(selected) => ws.protocols([selected.to_string()]),
        None => ws,
    };

    upgrade.on_upgrade(move |client_ws| pump_frames(client_ws, worker_ws))
}

/// Pipe frames both directions until either peer closes. Every frame is
/// forwarded as it arrives; HMR correctness depends on it.
async fn pump_frames(client_ws: ws::WebSocket, worker_ws: WorkerSocket) {
    use futures_util::{SinkExt, StreamExt};

    let (mut client_sink, mut client_stream) = client_ws.split();
    let (mut worker_sink, mut worker_stream) = worker_ws.split();

    let client_to_worker = async {
        while let Some(Ok(message)) = client_stream.next().await {
            let Some(message) = worker_frame(message) else {
                break;
            };
            if worker_sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = worker_sink.close().await;
    };

    let worker_to_client = async {
        while let Some(Ok(message)) = worker_stream.next().await {
            let Some(message) = client_frame(message) else {
                break;
            };
            if client_sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = client_sink.close().await;
    };

    // Each pump closes its sink on exit, which ends the other pump's stream,
    // so the join cannot hang on a half-open connection.
    tokio::join!(client_to_worker, worker_to_client);
}

/// Browser frame → worker frame. `None` means the connection is done.
fn worker_frame(message: ws::Message) -> Option<tungstenite::Message> {
    match message {
        ws::Message::Text(t) => Some(tungstenite::Message::Text(t.to_string())),
        ws::Message::Binary(b) => Some(tungstenite::Message::Binary(b.to_vec())),
        ws::Message::Ping(p) => Some(tungstenite::Message::Ping(p.to_vec())),
        ws::Message::Pong(p) => Some(tungstenite::Message::Pong(p.to_vec())),
        ws::Message::Close(_) => None,
    }
}

/// Worker frame → browser frame. `None` means the connection is done.
fn client_frame(message: tungstenite::Message) -> Option<ws::Message> {
    match message {
        tungstenite::Message::Text(t) => Some(ws::Message::Text(t.into())),
        tungstenite::Message::Binary(b) => Some(ws::Message::Binary(b.into())),
        tungstenite::Message::Ping(p) => Some(ws::Message::Ping(p.into())),
        tungstenite::Message::Pong(p) => Some(ws::Message::Pong(p.into())),
        tungstenite::Message::Close(_) | tungstenite::Message::Frame(_) => None,
    }
}

/// Proxy a raw request that carries a WebSocket upgrade header. The client's
/// offered subprotocols are read off the request before the extractor
/// consumes it.
pub async fn proxy_ws_raw(req: Request, target_port: u16, path: String) -> Response {
    use axum::extract::FromRequest;

    let offered_protocols = req
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match WebSocketUpgrade::from_request(req, &()).await {
        Ok(ws) => proxy_ws(ws, target_port, path, offered_protocols).await,
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}
