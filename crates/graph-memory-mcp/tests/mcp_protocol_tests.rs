//! Tests for MCP protocol JSON-RPC handling and the declared tool schemas.

use serde_json::{Value, json};

use graph_memory_mcp::protocol::{
    IncomingPayload, JsonRpcResponse, code, split_payload,
};
use graph_memory_mcp::server::dispatch::validate_arguments;
use graph_memory_mcp::tools::register_all_tools;

// =============================================================================
// JSON-RPC Message Structure Tests
// =============================================================================

#[test]
fn test_single_request_payload() {
    let payload = split_payload(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": "search", "arguments": {"query": "auth"}}
    }))
    .unwrap();

    match payload {
        IncomingPayload::Single(request) => {
            assert_eq!(request.method, "tools/call");
            assert_eq!(request.params["name"], "search");
        }
        IncomingPayload::Batch(_) => panic!("expected single request"),
    }
}

#[test]
fn test_batch_payload_preserves_order() {
    let payload = split_payload(json!([
        {"jsonrpc": "2.0", "id": "a", "method": "ping"},
        {"jsonrpc": "2.0", "id": "b", "method": "tools/list"}
    ]))
    .unwrap();

    match payload {
        IncomingPayload::Batch(requests) => {
            assert_eq!(requests[0].id, Some(json!("a")));
            assert_eq!(requests[1].id, Some(json!("b")));
        }
        IncomingPayload::Single(_) => panic!("expected batch"),
    }
}

#[test]
fn test_wrong_version_is_invalid_request() {
    let error = split_payload(json!({"jsonrpc": "1.0", "id": 5, "method": "ping"})).unwrap_err();
    assert_eq!(error.error.as_ref().unwrap().code, code::INVALID_REQUEST);
    assert_eq!(error.id, json!(5));
}

#[test]
fn test_error_response_wire_shape() {
    let response = JsonRpcResponse::error(Value::Null, code::SERVER_ERROR, "Payload Too Large");
    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(
        wire,
        json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32000, "message": "Payload Too Large"}
        })
    );
}

// =============================================================================
// Tool Schema Tests
// =============================================================================

#[test]
fn test_every_tool_declares_an_object_schema() {
    let registry = register_all_tools();
    let descriptors = registry.descriptors();
    for tool in descriptors["tools"].as_array().unwrap() {
        let schema = &tool["inputSchema"];
        assert_eq!(schema["type"], "object", "tool {}", tool["name"]);
        assert!(schema["properties"].is_object(), "tool {}", tool["name"]);
    }
}

#[test]
fn test_domain_tools_require_scope() {
    let registry = register_all_tools();
    for name in ["entity", "query", "search", "pagerank", "bulk-import"] {
        let tool = registry.get(name).unwrap();
        let schema = tool.input_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for field in ["clientProjectRoot", "repository", "branch"] {
            assert!(required.contains(&field), "{name} must require {field}");
        }
    }
}

#[test]
fn test_pagerank_schema_accepts_documented_arguments() {
    let registry = register_all_tools();
    let schema = registry.get("pagerank").unwrap().input_schema();

    let arguments = json!({
        "clientProjectRoot": "/tmp/r",
        "repository": "demo",
        "branch": "main",
        "projectedGraphName": "g",
        "nodeTableNames": ["Component"],
        "relationshipTableNames": ["DEPENDS_ON"]
    });
    assert!(validate_arguments(&schema, &arguments).is_ok());

    let missing = json!({
        "clientProjectRoot": "/tmp/r",
        "repository": "demo",
        "branch": "main"
    });
    let diagnostic = validate_arguments(&schema, &missing).unwrap_err();
    assert!(diagnostic.contains("projectedGraphName"));

    let wrong_type = json!({
        "clientProjectRoot": "/tmp/r",
        "repository": "demo",
        "branch": "main",
        "projectedGraphName": "g",
        "nodeTableNames": "Component"
    });
    let diagnostic = validate_arguments(&schema, &wrong_type).unwrap_err();
    assert!(diagnostic.contains("nodeTableNames"));
}

#[test]
fn test_shortest_path_requires_endpoints() {
    let registry = register_all_tools();
    let schema = registry.get("shortest-path").unwrap().input_schema();
    let required = schema["required"].as_array().unwrap();
    assert!(required.contains(&json!("startNodeId")));
    assert!(required.contains(&json!("endNodeId")));
}
