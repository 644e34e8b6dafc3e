//! Tool dispatch.
//!
//! One entry point for both transports: resolve the method, enforce the
//! tool's input schema, build the execution context, and bridge the handler
//! outcome onto the progress channel. Exactly one terminal outcome reaches
//! the client per admitted request, whatever the handler does: return,
//! fail, panic, time out, or get cancelled.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::db::DbProvisioner;
use crate::error::ToolError;
use crate::protocol::{JsonRpcRequest, OutboundFrame, PROTOCOL_VERSION, code};
use crate::server::progress::ProgressSink;
use crate::server::session::Session;
use crate::tools::{MemoryTool, SessionView, ToolContext, ToolRegistry};

/// Dispatcher shared by every transport connection.
pub struct Dispatcher {
    config: Config,
    tools: Arc<ToolRegistry>,
    provisioner: Arc<DbProvisioner>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: Config, tools: Arc<ToolRegistry>, provisioner: Arc<DbProvisioner>) -> Self {
        Self {
            config,
            tools,
            provisioner,
        }
    }

    /// Registered tool catalog.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Process one decoded request. All output flows through `tx`; the
    /// caller owns delivery and close semantics.
    pub async fn dispatch(
        &self,
        session: Arc<Session>,
        request: JsonRpcRequest,
        tx: mpsc::UnboundedSender<OutboundFrame>,
    ) {
        if request.is_notification() {
            self.handle_notification(&session, &request).await;
            return;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let sink = ProgressSink::new(id.clone(), tx);

        match request.method.as_str() {
            "initialize" => {
                sink.complete(initialize_result(&session, &request.params));
            }
            "tools/list" => sink.complete(self.tools.descriptors()),
            "ping" => sink.complete(json!({})),
            "tools/call" => {
                self.call_tool(&session, id, &request.params, sink).await;
            }
            other => sink.fail(
                code::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
                None,
            ),
        }
    }

    async fn handle_notification(&self, session: &Arc<Session>, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" | "initialized" => {
                tracing::debug!(session_id = %session.id, "client initialized");
            }
            "notifications/cancelled" => {
                if let Some(request_id) = request.params.get("requestId") {
                    let cancelled = session.cancel_request(request_id).await;
                    tracing::debug!(%request_id, cancelled, "cancellation requested");
                }
            }
            other => {
                tracing::debug!(method = other, "notification ignored");
            }
        }
    }

    async fn call_tool(
        &self,
        session: &Arc<Session>,
        id: Value,
        params: &Value,
        sink: ProgressSink,
    ) {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            sink.fail(
                code::INVALID_PARAMS,
                "Invalid params",
                Some(json!("missing tool name")),
            );
            return;
        };
        let Some(tool) = self.tools.get(name) else {
            sink.fail(
                code::METHOD_NOT_FOUND,
                format!("Tool not found: {name}"),
                None,
            );
            return;
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        if let Err(diagnostic) = validate_arguments(&tool.input_schema(), &arguments) {
            sink.fail(
                code::INVALID_PARAMS,
                "Invalid params",
                Some(Value::String(diagnostic)),
            );
            return;
        }

        tracing::info!(tool = name, session_id = %session.id, "executing tool");

        let cancel = session.begin_request(&id).await;
        let ctx = ToolContext::new(
            SessionView {
                id: session.id.clone(),
                client: session.client.clone(),
            },
            id.clone(),
            cancel.clone(),
            sink.clone(),
            Arc::clone(&self.provisioner),
        );

        self.run_handler(tool, &ctx, arguments, &sink, &cancel).await;
        session.finish_request(&id).await;
    }

    /// Drive the handler to exactly one terminal outcome.
    async fn run_handler(
        &self,
        tool: &dyn MemoryTool,
        ctx: &ToolContext,
        arguments: Value,
        sink: &ProgressSink,
        cancel: &tokio_util::sync::CancellationToken,
    ) {
        let execution = std::panic::AssertUnwindSafe(tool.execute(ctx, arguments)).catch_unwind();
        tokio::pin!(execution);

        tokio::select! {
            outcome = &mut execution => match outcome {
                Ok(Ok(value)) => sink.complete(call_tool_envelope(&value)),
                Ok(Err(ToolError::Cancelled)) => {
                    tracing::debug!(tool = tool.name(), "handler returned after cancellation");
                }
                Ok(Err(error)) => {
                    tracing::error!(tool = tool.name(), error = %error, "tool execution failed");
                    sink.fail(error.rpc_code(), error.rpc_message(), error.rpc_data());
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(tool = tool.name(), message, "tool handler panicked");
                    sink.fail(
                        code::INTERNAL_ERROR,
                        "Internal error",
                        Some(Value::String(message.to_string())),
                    );
                }
            },
            () = cancel.cancelled() => {
                // Client gone or session terminated: no response is emitted.
                tracing::debug!(tool = tool.name(), "request cancelled");
            }
            () = tokio::time::sleep(self.config.request_timeout) => {
                cancel.cancel();
                tracing::warn!(
                    tool = tool.name(),
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "request deadline expired"
                );
                sink.fail(code::SERVER_ERROR, "Request timeout", None);
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tools.len())
            .finish()
    }
}

/// Result of the `initialize` handshake.
fn initialize_result(session: &Session, params: &Value) -> Value {
    let requested = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);
    json!({
        "protocolVersion": requested,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "sessionId": session.id,
    })
}

/// Wrap a tool's JSON output in the MCP `CallToolResult` envelope.
fn call_tool_envelope(value: &Value) -> Value {
    json!({
        "content": [{"type": "text", "text": value.to_string()}],
        "isError": false,
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("handler panicked")
}

/// Enforce the declared input schema: required members must be present and
/// typed properties must match their primitive type. Tools additionally
/// deserialize into typed input structs, which covers enums and nesting.
///
/// # Errors
///
/// Returns the first violation as a diagnostic string.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !arguments.is_object() {
        return Err("arguments must be an object".to_string());
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if arguments.get(field).is_none() {
                return Err(format!("missing required field {field:?}"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, property) in properties {
            let Some(value) = arguments.get(key) else {
                continue;
            };
            if let Some(expected) = property.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "field {key:?} must be of type {expected}, got {}",
                        type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolResult;
    use crate::server::session::{ClientInfo, SessionRegistry};
    use crate::tools::register_all_tools;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct SlowTool {
        observed_cancel: Arc<Mutex<Option<CancellationToken>>>,
    }

    #[async_trait::async_trait]
    impl MemoryTool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "sleeps past any reasonable deadline"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, ctx: &ToolContext, _input: Value) -> ToolResult<Value> {
            *self.observed_cancel.lock().unwrap() = Some(ctx.cancel.clone());
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!({}))
        }
    }

    struct StreamingTool;

    #[async_trait::async_trait]
    impl MemoryTool for StreamingTool {
        fn name(&self) -> &'static str {
            "streamer"
        }
        fn description(&self) -> &'static str {
            "emits progress then a value"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, ctx: &ToolContext, _input: Value) -> ToolResult<Value> {
            ctx.send_progress(json!({"status": "in_progress", "message": "step 1"}));
            ctx.send_progress(json!({"status": "complete", "message": "done", "isFinal": true}));
            Ok(json!({"answer": 42}))
        }
    }

    struct PanickingTool;

    #[async_trait::async_trait]
    impl MemoryTool for PanickingTool {
        fn name(&self) -> &'static str {
            "panics"
        }
        fn description(&self) -> &'static str {
            "dies"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _ctx: &ToolContext, _input: Value) -> ToolResult<Value> {
            panic!("boom");
        }
    }

    fn dispatcher_with(tools: ToolRegistry, config: Config) -> Dispatcher {
        Dispatcher::new(
            config,
            Arc::new(tools),
            Arc::new(DbProvisioner::new(&Config::for_testing())),
        )
    }

    async fn session() -> Arc<Session> {
        let registry = SessionRegistry::new(Duration::from_secs(60), CancellationToken::new());
        registry.create(ClientInfo::default()).await
    }

    fn request(id: Value, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    async fn collect(
        dispatcher: &Dispatcher,
        session: Arc<Session>,
        req: JsonRpcRequest,
    ) -> Vec<OutboundFrame> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.dispatch(session, req, tx).await;
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_initialize_and_tools_list() {
        let dispatcher = dispatcher_with(register_all_tools(), Config::for_testing());
        let session = session().await;

        let frames = collect(
            &dispatcher,
            Arc::clone(&session),
            request(
                json!(1),
                "initialize",
                json!({"protocolVersion": "2025-03-26", "capabilities": {}, "clientInfo": {"name": "t", "version": "1"}}),
            ),
        )
        .await;
        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        let result = r.result.as_ref().unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["sessionId"], json!(session.id));

        let frames = collect(
            &dispatcher,
            session,
            request(json!(2), "tools/list", json!({})),
        )
        .await;
        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        let names: Vec<&str> = r.result.as_ref().unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        for expected in [
            "memory-bank",
            "entity",
            "introspect",
            "query",
            "associate",
            "analyze",
            "detect",
            "bulk-import",
            "search",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let dispatcher = dispatcher_with(register_all_tools(), Config::for_testing());
        let frames = collect(
            &dispatcher,
            session().await,
            request(json!(1), "does/not/exist", json!({})),
        )
        .await;
        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        assert_eq!(r.error.as_ref().unwrap().code, code::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_tool_mentions_name() {
        let dispatcher = dispatcher_with(register_all_tools(), Config::for_testing());
        let frames = collect(
            &dispatcher,
            session().await,
            request(
                json!(1),
                "tools/call",
                json!({"name": "does-not-exist", "arguments": {}}),
            ),
        )
        .await;
        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        let error = r.error.as_ref().unwrap();
        assert_eq!(error.code, code::METHOD_NOT_FOUND);
        assert!(error.message.contains("does-not-exist"));
    }

    #[tokio::test]
    async fn test_schema_violation_rejected_before_handler() {
        let dispatcher = dispatcher_with(register_all_tools(), Config::for_testing());
        let frames = collect(
            &dispatcher,
            session().await,
            request(
                json!(1),
                "tools/call",
                json!({"name": "search", "arguments": {"repository": "demo"}}),
            ),
        )
        .await;
        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        let error = r.error.as_ref().unwrap();
        assert_eq!(error.code, code::INVALID_PARAMS);
        assert!(error.data.as_ref().unwrap().as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn test_progress_precedes_terminal_response() {
        let dispatcher = dispatcher_with(
            ToolRegistry::from_tools(vec![Box::new(StreamingTool)]),
            Config::for_testing(),
        );
        let frames = collect(
            &dispatcher,
            session().await,
            request(
                json!(7),
                "tools/call",
                json!({"name": "streamer", "arguments": {}}),
            ),
        )
        .await;

        assert_eq!(frames.len(), 3);
        assert!(!frames[0].is_response());
        assert!(!frames[1].is_response());
        let OutboundFrame::Response(r) = &frames[2] else {
            panic!("expected terminal response last");
        };
        assert_eq!(r.id, json!(7));
        let result = r.result.as_ref().unwrap();
        assert_eq!(result["isError"], json!(false));
        assert!(result["content"][0]["text"].as_str().unwrap().contains("42"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_handler() {
        let observed = Arc::new(Mutex::new(None));
        let mut config = Config::for_testing();
        config.request_timeout = Duration::from_millis(100);
        let dispatcher = dispatcher_with(
            ToolRegistry::from_tools(vec![Box::new(SlowTool {
                observed_cancel: Arc::clone(&observed),
            })]),
            config,
        );

        let started = std::time::Instant::now();
        let frames = collect(
            &dispatcher,
            session().await,
            request(json!(1), "tools/call", json!({"name": "slow", "arguments": {}})),
        )
        .await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        let error = r.error.as_ref().unwrap();
        assert_eq!(error.code, code::SERVER_ERROR);
        assert_eq!(error.message, "Request timeout");

        let token = observed.lock().unwrap().clone().expect("handler ran");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let dispatcher = dispatcher_with(
            ToolRegistry::from_tools(vec![Box::new(PanickingTool)]),
            Config::for_testing(),
        );
        let frames = collect(
            &dispatcher,
            session().await,
            request(json!(1), "tools/call", json!({"name": "panics", "arguments": {}})),
        )
        .await;
        let OutboundFrame::Response(r) = &frames[0] else {
            panic!("expected response");
        };
        let error = r.error.as_ref().unwrap();
        assert_eq!(error.code, code::INTERNAL_ERROR);
        assert!(error.data.as_ref().unwrap().as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_notification_produces_no_frames() {
        let dispatcher = dispatcher_with(register_all_tools(), Config::for_testing());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: "notifications/initialized".to_string(),
            params: json!({}),
            id: None,
        };
        dispatcher.dispatch(session().await, req, tx).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_validate_arguments() {
        let schema = json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"},
                "tags": {"type": "array"},
            },
            "required": ["query"],
        });

        assert!(validate_arguments(&schema, &json!({"query": "x"})).is_ok());
        assert!(validate_arguments(&schema, &json!({"query": "x", "limit": 5})).is_ok());

        let missing = validate_arguments(&schema, &json!({})).unwrap_err();
        assert!(missing.contains("query"));

        let wrong_type = validate_arguments(&schema, &json!({"query": 1})).unwrap_err();
        assert!(wrong_type.contains("string"));

        let not_object = validate_arguments(&schema, &json!([])).unwrap_err();
        assert!(not_object.contains("object"));
    }
}
