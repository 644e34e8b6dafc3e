//! HTTP streaming transport.
//!
//! One endpoint, `/mcp`: POST submits JSON-RPC requests (single or batch),
//! GET opens the session notification stream, DELETE terminates a session,
//! OPTIONS is answered by the CORS layer. `tools/call` and batches stream
//! `mcpNotification` / `mcpResponse` SSE events; short calls answer plain
//! JSON. Sessions travel in the `Mcp-Session-Id` header.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::protocol::{
    IncomingPayload, JsonRpcRequest, JsonRpcResponse, OutboundFrame, SESSION_HEADER, code,
    split_payload,
};
use crate::server::dispatch::Dispatcher;
use crate::server::security::{self, Rejection};
use crate::server::session::{ClientInfo, Session, SessionRegistry};

/// SSE event name for progress notifications.
const EVENT_NOTIFICATION: &str = "mcpNotification";

/// SSE event name for terminal responses.
const EVENT_RESPONSE: &str = "mcpResponse";

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub started: Instant,
}

/// Build the router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route(
            "/mcp",
            axum::routing::post(handle_mcp_post)
                .get(handle_mcp_get)
                .delete(handle_mcp_delete),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("mcp-session-id"),
        ]);
    if config.cors_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.registry.count().await,
        "uptimeSec": state.started.elapsed().as_secs(),
    }))
}

async fn handle_mcp_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    // Guards run before any byte of the body is interpreted.
    if let Err(rejection) = security::check_declared_size(&headers, state.config.max_request_size) {
        return rejection_response(&rejection);
    }
    if let Err(rejection) = security::validate_post_headers(&headers) {
        return rejection_response(&rejection);
    }
    let bytes = match security::read_body_limited(body, state.config.max_request_size).await {
        Ok(bytes) => bytes,
        Err(rejection) => return rejection_response(&rejection),
    };

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            return json_response(
                StatusCode::OK,
                None,
                &JsonRpcResponse::error(Value::Null, code::PARSE_ERROR, format!("Parse error: {e}")),
            );
        }
    };
    let payload = match split_payload(value) {
        Ok(payload) => payload,
        Err(error_response) => return json_response(StatusCode::OK, None, &error_response),
    };

    // `initialize` mints the session; everything else must present one.
    let session = match resolve_session(&state, &headers, &payload).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match payload {
        IncomingPayload::Single(request) if !is_streaming(&request) => {
            respond_json(&state, session, *request).await
        }
        IncomingPayload::Single(request) => stream_requests(&state, session, vec![*request]),
        IncomingPayload::Batch(requests) => stream_requests(&state, session, requests),
    }
}

/// Open the session-scoped stream for server-initiated notifications.
async fn handle_mcp_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = match require_session(&state, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let receiver = session.subscribe();
    let stream = async_stream::stream! {
        let mut live = BroadcastStream::new(receiver);
        while let Some(item) = live.next().await {
            match item {
                Ok(notification) => {
                    let data = serde_json::to_string(&notification).unwrap_or_default();
                    yield Ok::<_, Infallible>(Event::default().event(EVENT_NOTIFICATION).data(data));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "notification stream lagged");
                }
            }
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("ping"))
        .into_response();
    attach_session_header(&mut response, &session.id);
    response
}

/// Terminate the session named in the header.
async fn handle_mcp_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = header_session_id(&headers) else {
        return session_invalid_response(Value::Null);
    };
    if state.registry.terminate(&session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        session_invalid_response(Value::Null)
    }
}

fn is_streaming(request: &JsonRpcRequest) -> bool {
    request.method == "tools/call"
}

fn header_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

async fn resolve_session(
    state: &AppState,
    headers: &HeaderMap,
    payload: &IncomingPayload,
) -> Result<Arc<Session>, Response> {
    if let IncomingPayload::Single(request) = payload {
        if request.method == "initialize" {
            let client = ClientInfo::from_params(&request.params);
            return Ok(state.registry.create(client).await);
        }
    }

    let first_id = match payload {
        IncomingPayload::Single(request) => request.id.clone().unwrap_or(Value::Null),
        IncomingPayload::Batch(requests) => requests
            .iter()
            .find_map(|r| r.id.clone())
            .unwrap_or(Value::Null),
    };
    let Some(session_id) = header_session_id(headers) else {
        return Err(session_invalid_response(first_id));
    };
    match state.registry.lookup(&session_id).await {
        Some(session) => Ok(session),
        None => Err(session_invalid_response(first_id)),
    }
}

async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Arc<Session>, Response> {
    let Some(session_id) = header_session_id(headers) else {
        return Err(session_invalid_response(Value::Null));
    };
    state
        .registry
        .lookup(&session_id)
        .await
        .ok_or_else(|| session_invalid_response(Value::Null))
}

/// Short non-streamed calls: dispatch inline and answer as JSON.
async fn respond_json(state: &AppState, session: Arc<Session>, request: JsonRpcRequest) -> Response {
    let session_id = session.id.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.dispatcher.dispatch(session, request, tx).await;

    // Notifications produce no frame at all.
    let mut terminal = None;
    while let Ok(frame) = rx.try_recv() {
        if let OutboundFrame::Response(response) = frame {
            terminal = Some(response);
        }
    }
    match terminal {
        Some(response) => json_response(StatusCode::OK, Some(&session_id), &response),
        None => {
            let mut response = StatusCode::ACCEPTED.into_response();
            attach_session_header(&mut response, &session_id);
            response
        }
    }
}

/// Streamed calls: spawn dispatch per request and relay frames as SSE
/// events until every terminal response went out. Dropping the stream
/// (client disconnect) cancels what is still in flight.
fn stream_requests(
    state: &AppState,
    session: Arc<Session>,
    requests: Vec<JsonRpcRequest>,
) -> Response {
    let session_id = session.id.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let expected: usize = requests.iter().filter(|r| !r.is_notification()).count();
    let request_ids: Vec<Value> = requests.iter().filter_map(|r| r.id.clone()).collect();

    for request in requests {
        let dispatcher = Arc::clone(&state.dispatcher);
        let session = Arc::clone(&session);
        let tx = tx.clone();
        tokio::spawn(async move {
            dispatcher.dispatch(session, request, tx).await;
        });
    }
    drop(tx);

    // Disconnect propagation: dropping the stream cancels the connection
    // token, which cancels whatever of this POST is still in flight.
    let conn_token = CancellationToken::new();
    let watcher_token = conn_token.clone();
    let watcher_session = Arc::clone(&session);
    tokio::spawn(async move {
        watcher_token.cancelled().await;
        for id in request_ids {
            watcher_session.cancel_request(&id).await;
        }
    });
    let guard = conn_token.drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut remaining = expected;
        while remaining > 0 {
            let Some(frame) = rx.recv().await else { break };
            let event_name = if frame.is_response() {
                remaining -= 1;
                EVENT_RESPONSE
            } else {
                EVENT_NOTIFICATION
            };
            yield Ok::<_, Infallible>(Event::default().event(event_name).data(frame.to_json()));
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("ping"))
        .into_response();
    attach_session_header(&mut response, &session_id);
    response
}

fn rejection_response(rejection: &Rejection) -> Response {
    json_response(rejection.status(), None, &rejection.to_response())
}

fn session_invalid_response(id: Value) -> Response {
    json_response(
        StatusCode::OK,
        None,
        &JsonRpcResponse::error(id, code::SERVER_ERROR, "Session invalid"),
    )
}

fn json_response(status: StatusCode, session_id: Option<&str>, body: &JsonRpcResponse) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(session_id) = session_id {
        attach_session_header(&mut response, session_id);
    }
    response
}

fn attach_session_header(response: &mut Response, session_id: &str) {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("mcp-session-id"), value);
    }
}
