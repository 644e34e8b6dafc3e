//! Per-request progress channel.
//!
//! Every admitted request gets a [`ProgressSink`]: zero or more
//! `notifications/progress` frames followed by exactly one terminal
//! response. The sink is the serialization point for a request's outbound
//! traffic; transports only see ordered [`OutboundFrame`]s on the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::protocol::{JsonRpcNotification, JsonRpcResponse, OutboundFrame};

/// Method name of progress notifications.
pub const PROGRESS_METHOD: &str = "notifications/progress";

/// Per-request sink delivering progress then exactly one terminal response.
#[derive(Clone)]
pub struct ProgressSink {
    /// Request id, echoed as the progress token.
    request_id: Value,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    terminated: Arc<AtomicBool>,
}

impl ProgressSink {
    /// Create a sink bound to a request id and a transport channel.
    #[must_use]
    pub fn new(request_id: Value, tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            request_id,
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit one `notifications/progress` frame.
    ///
    /// The payload is serialized into the MCP content envelope; a payload
    /// with `isFinal: true` marks the last notification before the terminal
    /// response. Calls after the terminal outcome are dropped with a warning.
    pub fn progress(&self, payload: &Value) {
        if self.terminated.load(Ordering::Acquire) {
            tracing::warn!(
                request_id = %self.request_id,
                "progress after terminal response dropped"
            );
            return;
        }

        let is_final = payload
            .get("isFinal")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let text = payload.to_string();
        let notification = JsonRpcNotification::new(
            PROGRESS_METHOD,
            json!({
                "progressToken": self.request_id,
                "content": [{"type": "text", "text": text}],
                "isFinal": is_final,
            }),
        );
        self.send(OutboundFrame::Notification(notification));
    }

    /// Deliver the terminal success response and close the sink.
    pub fn complete(&self, result: Value) {
        if self.mark_terminated() {
            tracing::warn!(request_id = %self.request_id, "duplicate terminal outcome dropped");
            return;
        }
        self.send(OutboundFrame::Response(JsonRpcResponse::success(
            self.request_id.clone(),
            result,
        )));
    }

    /// Deliver the terminal error response and close the sink.
    pub fn fail(&self, code: i32, message: impl Into<String>, data: Option<Value>) {
        if self.mark_terminated() {
            tracing::warn!(request_id = %self.request_id, "duplicate terminal outcome dropped");
            return;
        }
        self.send(OutboundFrame::Response(JsonRpcResponse::error_with_data(
            self.request_id.clone(),
            code,
            message,
            data,
        )));
    }

    /// Whether a terminal outcome was already delivered.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Request id this sink is bound to.
    #[must_use]
    pub fn request_id(&self) -> &Value {
        &self.request_id
    }

    fn mark_terminated(&self) -> bool {
        self.terminated.swap(true, Ordering::AcqRel)
    }

    fn send(&self, frame: OutboundFrame) {
        // A failed send means the transport observed its close; frames are
        // dropped rather than written after close.
        if self.tx.send(frame).is_err() {
            tracing::debug!(request_id = %self.request_id, "transport closed, frame dropped");
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("request_id", &self.request_id)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
