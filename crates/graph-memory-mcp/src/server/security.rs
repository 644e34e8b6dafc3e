//! Request admission guards.
//!
//! Applied by the HTTP transport before any byte of a request reaches the
//! codec: declared-size check on `Content-Length`, capped streaming body
//! collection, and header validation. The per-request deadline, the third
//! guard of the set, lives in the dispatcher where the handler future is
//! available.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode, header};

use crate::protocol::{JsonRpcResponse, code};

/// Proxy headers worth a log line when they show up.
const SUSPICIOUS_PROXY_HEADERS: &[&str] = &["x-forwarded-host", "x-original-url", "x-rewrite-url"];

/// A request rejected before dispatch.
#[derive(Debug)]
pub enum Rejection {
    /// Body exceeds the configured maximum, declared or observed.
    PayloadTooLarge,
    /// POST body is not declared as JSON.
    UnsupportedContentType(String),
    /// Accept header misses a required content type.
    NotAcceptable(String),
    /// Body could not be read from the wire.
    UnreadableBody(String),
}

impl Rejection {
    /// HTTP status for this rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::UnreadableBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON-RPC error body for this rejection, always with a null id since
    /// the request was never decoded.
    #[must_use]
    pub fn to_response(&self) -> JsonRpcResponse {
        match self {
            Self::PayloadTooLarge => JsonRpcResponse::error(
                serde_json::Value::Null,
                code::SERVER_ERROR,
                "Payload Too Large",
            ),
            Self::UnsupportedContentType(detail) | Self::NotAcceptable(detail) => {
                JsonRpcResponse::error(
                    serde_json::Value::Null,
                    code::INVALID_REQUEST,
                    format!("Invalid request: {detail}"),
                )
            }
            Self::UnreadableBody(detail) => JsonRpcResponse::error(
                serde_json::Value::Null,
                code::INVALID_REQUEST,
                format!("Invalid request: {detail}"),
            ),
        }
    }
}

/// Reject on a declared `Content-Length` above the limit without reading
/// the body.
///
/// # Errors
///
/// Returns [`Rejection::PayloadTooLarge`] when the declared size exceeds
/// `max_request_size`.
pub fn check_declared_size(headers: &HeaderMap, max_request_size: usize) -> Result<(), Rejection> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    match declared {
        Some(length) if length > max_request_size => {
            tracing::warn!(declared = length, max = max_request_size, "declared size over limit");
            Err(Rejection::PayloadTooLarge)
        }
        _ => Ok(()),
    }
}

/// Collect the body while counting bytes, aborting on the first byte past
/// the limit. Protects against absent or spoofed `Content-Length`.
///
/// # Errors
///
/// Returns [`Rejection::PayloadTooLarge`] on overflow or
/// [`Rejection::UnreadableBody`] on wire errors.
pub async fn read_body_limited(body: Body, max_request_size: usize) -> Result<Bytes, Rejection> {
    match axum::body::to_bytes(body, max_request_size).await {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            let detail = e.to_string();
            if detail.contains("length limit") {
                tracing::warn!(max = max_request_size, "streamed body over limit");
                Err(Rejection::PayloadTooLarge)
            } else {
                Err(Rejection::UnreadableBody(detail))
            }
        }
    }
}

/// Validate POST headers: JSON content type, and an Accept covering both
/// negotiable response types. Suspicious proxy headers are logged, never
/// rejected.
///
/// # Errors
///
/// Returns the matching [`Rejection`] on violation.
pub fn validate_post_headers(headers: &HeaderMap) -> Result<(), Rejection> {
    log_suspicious_proxy_headers(headers);

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .eq_ignore_ascii_case("application/json")
    {
        return Err(Rejection::UnsupportedContentType(format!(
            "Content-Type must be application/json, got {content_type:?}"
        )));
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");
    if !accepts(accept, "application/json") || !accepts(accept, "text/event-stream") {
        return Err(Rejection::NotAcceptable(
            "Accept must include application/json and text/event-stream".to_string(),
        ));
    }

    Ok(())
}

fn accepts(accept: &str, content_type: &str) -> bool {
    accept.split(',').any(|entry| {
        let media = entry.split(';').next().unwrap_or_default().trim();
        media == content_type || media == "*/*" || {
            let prefix = content_type.split('/').next().unwrap_or_default();
            media == format!("{prefix}/*")
        }
    })
}

fn log_suspicious_proxy_headers(headers: &HeaderMap) {
    for name in SUSPICIOUS_PROXY_HEADERS {
        if let Some(value) = headers.get(*name) {
            tracing::warn!(header = name, value = ?value, "suspicious proxy header");
        }
    }
}
