//! JSON-RPC 2.0 message codec.
//!
//! Shared by both transports: the stdio loop frames messages as single
//! newline-terminated lines, the HTTP transport as request bodies and SSE
//! `data:` payloads. Every outbound message goes through [`JsonRpcResponse`]
//! or [`JsonRpcNotification`] so the wire shape is validated in one place.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision negotiated during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Header carrying the session id on the HTTP transport.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Readiness sentinel emitted once on stdout after stdio startup.
pub const STDIO_READY_SENTINEL: &str = "MCP_STDIO_SERVER_READY_FOR_TESTING";

/// JSON-RPC 2.0 error codes.
pub mod code {
    /// Malformed JSON frame.
    pub const PARSE_ERROR: i32 = -32700;
    /// Missing `method`, wrong `jsonrpc` version.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method or tool.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Schema violation in `params`.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Uncaught handler failure or storage failure.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Server-defined: payload too large, timeout, session invalid.
    pub const SERVER_ERROR: i32 = -32000;
}

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and expect no response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate the JSON-RPC 2.0 envelope.
    ///
    /// # Errors
    ///
    /// Returns the violation message when `jsonrpc` is not `"2.0"`, the
    /// method is empty, or the id is neither a string nor an integer.
    pub fn validate(&self) -> Result<(), String> {
        if self.jsonrpc != "2.0" {
            return Err(format!("expected jsonrpc \"2.0\", got {:?}", self.jsonrpc));
        }
        if self.method.is_empty() {
            return Err("missing method".to_string());
        }
        match &self.id {
            None | Some(Value::String(_)) => Ok(()),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            Some(other) => Err(format!("id must be a string or integer, got {other}")),
        }
    }
}

/// JSON-RPC 2.0 response.
///
/// The id is always serialized, `null` for responses to unparseable
/// requests, and must match the originating request id by value and type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    #[must_use]
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    #[must_use]
    pub fn error_with_data(
        id: Value,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JsonRpcResponse::VERSION),
            method: method.into(),
            params,
        }
    }
}

/// A message travelling server-to-client.
///
/// Transports serialize these: the stdio writer as one line each, the SSE
/// writer as `mcpNotification` / `mcpResponse` events.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl OutboundFrame {
    /// Serialize to a single-line JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        let serialized = match self {
            Self::Response(r) => serde_json::to_string(r),
            Self::Notification(n) => serde_json::to_string(n),
        };
        // Both shapes are plain data structs; serialization cannot fail.
        serialized.unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize outbound frame");
            String::from("{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32603,\"message\":\"serialization failure\"},\"id\":null}")
        })
    }

    /// Whether this frame is a terminal response.
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// A decoded POST body: either a single request or a batch.
#[derive(Debug)]
pub enum IncomingPayload {
    Single(Box<JsonRpcRequest>),
    Batch(Vec<JsonRpcRequest>),
}

/// Decode one request object, yielding an invalid-request response on shape
/// violations so the caller can answer without dispatching.
///
/// # Errors
///
/// Returns the ready-to-send error response when the value is not a valid
/// JSON-RPC 2.0 request.
pub fn decode_request(value: Value) -> Result<JsonRpcRequest, Box<JsonRpcResponse>> {
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => {
            return Err(Box::new(JsonRpcResponse::error(
                id,
                code::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            )));
        }
    };
    if let Err(violation) = request.validate() {
        return Err(Box::new(JsonRpcResponse::error(
            id,
            code::INVALID_REQUEST,
            format!("Invalid request: {violation}"),
        )));
    }
    Ok(request)
}

/// Split a parsed body into its requests. An empty batch is an invalid
/// request per JSON-RPC 2.0.
///
/// # Errors
///
/// Returns an error response for an empty batch or a non-object,
/// non-array body.
pub fn split_payload(value: Value) -> Result<IncomingPayload, Box<JsonRpcResponse>> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Box::new(JsonRpcResponse::error(
                    Value::Null,
                    code::INVALID_REQUEST,
                    "Invalid request: empty batch",
                )));
            }
            let mut requests = Vec::with_capacity(items.len());
            for item in items {
                requests.push(decode_request(item)?);
            }
            Ok(IncomingPayload::Batch(requests))
        }
        obj @ Value::Object(_) => Ok(IncomingPayload::Single(Box::new(decode_request(obj)?))),
        other => Err(Box::new(JsonRpcResponse::error(
            Value::Null,
            code::INVALID_REQUEST,
            format!("Invalid request: expected object or array, got {other}"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"search"}}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.method, "tools/call");
        assert_eq!(req.id, Some(json!(7)));
        assert!(req.validate().is_ok());
        assert!(!req.is_notification());
    }

    #[test]
    fn notification_has_no_id() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn wrong_version_rejected() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn fractional_id_rejected() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn response_id_preserves_type() {
        let string_id = JsonRpcResponse::success(json!("abc"), json!({}));
        let serialized = serde_json::to_value(&string_id).unwrap();
        assert_eq!(serialized["id"], json!("abc"));

        let int_id = JsonRpcResponse::success(json!(3), json!({}));
        let serialized = serde_json::to_value(&int_id).unwrap();
        assert_eq!(serialized["id"], json!(3));
    }

    #[test]
    fn null_id_serialized_for_parse_errors() {
        let resp = JsonRpcResponse::error(Value::Null, code::PARSE_ERROR, "Parse error");
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains("\"id\":null"), "{text}");
        assert!(!text.contains("\"result\""));
    }

    #[test]
    fn error_response_shape() {
        let resp = JsonRpcResponse::error_with_data(
            json!(3),
            code::INVALID_PARAMS,
            "Invalid params",
            Some(json!({"field": "branch"})),
        );
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["error"]["code"], json!(-32602));
        assert_eq!(v["error"]["data"]["field"], json!("branch"));
    }

    #[test]
    fn split_single_object() {
        let payload = split_payload(json!({"jsonrpc":"2.0","id":1,"method":"ping"})).unwrap();
        assert!(matches!(payload, IncomingPayload::Single(_)));
    }

    #[test]
    fn split_batch() {
        let payload = split_payload(json!([
            {"jsonrpc":"2.0","id":1,"method":"ping"},
            {"jsonrpc":"2.0","id":2,"method":"tools/list"}
        ]))
        .unwrap();
        match payload {
            IncomingPayload::Batch(reqs) => assert_eq!(reqs.len(), 2),
            IncomingPayload::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn empty_batch_rejected() {
        let err = split_payload(json!([])).unwrap_err();
        assert_eq!(err.error.as_ref().unwrap().code, code::INVALID_REQUEST);
    }

    #[test]
    fn invalid_entry_keeps_its_id() {
        let err = split_payload(json!({"jsonrpc":"2.0","id":9})).unwrap_err();
        assert_eq!(err.id, json!(9));
        assert_eq!(err.error.as_ref().unwrap().code, code::INVALID_REQUEST);
    }

    #[test]
    fn frame_serializes_to_single_line() {
        let frame = OutboundFrame::Notification(JsonRpcNotification::new(
            "notifications/progress",
            json!({"progressToken": 7}),
        ));
        let line = frame.to_json();
        assert!(!line.contains('\n'));
        assert!(line.contains("notifications/progress"));
    }
}
