//! MCP server validation tests.
//!
//! Tests JSON-RPC 2.0 protocol compliance, tool execution, and error handling
//! against a server backed by the in-memory browser engine.

mod common;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use common::Harness;
use tabdriver_mcp::server::ServerState;
use tabdriver_mcp::{McpServer, TabHandle, ToolMode, ToolRegistry};

// JSON-RPC 2.0 types, as a client sees them
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// MCP test client talking to an in-process server.
struct McpTestClient {
    server: McpServer,
    harness: Harness,
    next_id: u64,
}

impl McpTestClient {
    fn new(mode: ToolMode) -> Self {
        let harness = Harness::new(mode);
        let registry = ToolRegistry::with_mode(harness.browser.clone(), mode);
        Self {
            server: McpServer::with_registry(registry),
            harness,
            next_id: 1,
        }
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
        let id = self.next_id;
        self.next_id += 1;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.into(),
            params,
        };
        let response = self.send_raw(&serde_json::to_string(&request).unwrap()).await;
        let response = response.expect("requests always get a response");
        assert_eq!(response.jsonrpc, "2.0");
        assert_eq!(response.id, Some(id));
        response
    }

    async fn notify(&mut self, method: &str) {
        let notification = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: None,
            method: method.into(),
            params: None,
        };
        let response = self
            .send_raw(&serde_json::to_string(&notification).unwrap())
            .await;
        assert!(response.is_none(), "notifications get no response");
    }

    async fn send_raw(&self, line: &str) -> Option<JsonRpcResponse> {
        let response = self.server.handle_message(line).await?;
        let json = serde_json::to_string(&response).unwrap();
        Some(serde_json::from_str(&json).unwrap())
    }

    async fn initialize(&mut self) -> JsonRpcResponse {
        let response = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "test-client", "version": "0.1.0" }
                })),
            )
            .await;
        self.notify("notifications/initialized").await;
        response
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        let response = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await;
        assert!(response.error.is_none(), "unexpected error: {:?}", response.error);
        response.result.unwrap()
    }
}

fn first_text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap()
}

// ============================================================================
// Protocol Compliance Tests
// ============================================================================

#[tokio::test]
async fn test_initialize_handshake() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    assert_eq!(client.server.state().await, ServerState::Uninitialized);

    let response = client.initialize().await;
    assert!(response.error.is_none());

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "tabdriver-mcp");
    assert!(result["capabilities"]["tools"].is_object());
    assert_eq!(client.server.state().await, ServerState::Ready);
}

#[tokio::test]
async fn test_initialize_requires_params() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    let response = client.request("initialize", None).await;
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_requests_before_initialize_are_rejected() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);

    let response = client.request("tools/list", None).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("not initialized"));

    let response = client
        .request(
            "tools/call",
            Some(json!({ "name": "browser_navigate", "arguments": { "url": "https://example.com" } })),
        )
        .await;
    assert!(response.error.is_some());
    assert!(client.harness.engine.tabs().is_empty());
}

#[tokio::test]
async fn test_list_tools() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    client.initialize().await;

    let response = client.request("tools/list", None).await;
    assert!(response.error.is_none());

    let result = response.result.unwrap();
    let tools = result["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();

    assert!(names.contains(&"browser_navigate"));
    assert!(names.contains(&"browser_save_as_pdf"));
    assert!(names.contains(&"browser_choose_file"));
    assert!(names.contains(&"browser_snapshot"));

    for tool in tools {
        assert!(tool["description"].is_string());
        assert_eq!(tool["inputSchema"]["type"], "object");
    }
}

#[tokio::test]
async fn test_list_tools_without_snapshot() {
    let mut client = McpTestClient::new(ToolMode::NoSnapshot);
    client.initialize().await;

    let result = client.request("tools/list", None).await.result.unwrap();
    let names: Vec<&str> = result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(!names.contains(&"browser_snapshot"));
}

#[tokio::test]
async fn test_ping() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    let response = client.request("ping", None).await;
    assert_eq!(response.result, Some(json!({})));
}

#[tokio::test]
async fn test_unknown_method() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    client.initialize().await;

    let response = client.request("resources/list", None).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("resources/list"));
}

#[tokio::test]
async fn test_parse_error() {
    let client = McpTestClient::new(ToolMode::Snapshot);
    let response = client.send_raw("{not json").await.unwrap();
    assert_eq!(response.error.unwrap().code, -32700);
    assert_eq!(response.id, None);
}

#[tokio::test]
async fn test_invalid_message_shape() {
    let client = McpTestClient::new(ToolMode::Snapshot);
    let response = client.send_raw(r#"{"jsonrpc":"2.0","id":1}"#).await.unwrap();
    assert_eq!(response.error.unwrap().code, -32600);
}

// ============================================================================
// Tool Execution Tests
// ============================================================================

#[tokio::test]
async fn test_tool_call_navigate() {
    let mut client = McpTestClient::new(ToolMode::NoSnapshot);
    client.initialize().await;

    let result = client
        .call_tool("browser_navigate", json!({ "url": "https://example.com" }))
        .await;

    assert_eq!(result["isError"], false);
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(first_text(&result), "Navigated to https://example.com");
}

#[tokio::test]
async fn test_tool_call_invalid_params_is_error_result() {
    let mut client = McpTestClient::new(ToolMode::NoSnapshot);
    client.initialize().await;

    let result = client
        .call_tool("browser_wait", json!({ "time": -3 }))
        .await;
    assert_eq!(result["isError"], true);
    assert!(first_text(&result).starts_with("invalid parameters: `time`"));
}

#[tokio::test]
async fn test_tool_call_without_tab_is_error_result() {
    let mut client = McpTestClient::new(ToolMode::NoSnapshot);
    client.initialize().await;

    let result = client.call_tool("browser_go_forward", json!({})).await;
    assert_eq!(result["isError"], true);
    assert!(first_text(&result).starts_with("No open pages available."));
}

#[tokio::test]
async fn test_tool_call_unknown_tool() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    client.initialize().await;

    let response = client
        .request("tools/call", Some(json!({ "name": "browser_fly", "arguments": {} })))
        .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("browser_fly"));
}

#[tokio::test]
async fn test_tool_call_missing_arguments_defaults_to_empty() {
    let mut client = McpTestClient::new(ToolMode::Snapshot);
    client.initialize().await;

    let response = client
        .request("tools/call", Some(json!({ "name": "browser_tab_list" })))
        .await;
    let result = response.result.unwrap();
    assert_eq!(result["isError"], false);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_browser() {
    let mut client = McpTestClient::new(ToolMode::NoSnapshot);
    client.initialize().await;
    client
        .call_tool("browser_navigate", json!({ "url": "https://example.com" }))
        .await;

    let response = client.request("shutdown", None).await;
    assert!(response.error.is_none());
    assert_eq!(client.server.state().await, ServerState::ShuttingDown);

    client.server.serve(&b""[..], Vec::new()).await.unwrap();
    assert!(client.harness.engine.tab(0).is_closed());
    assert_eq!(client.harness.engine.shutdown_calls(), 1);
}

#[tokio::test]
async fn test_serve_over_byte_streams() {
    let harness = Harness::new(ToolMode::NoSnapshot);
    let server = McpServer::with_registry(ToolRegistry::new(
        harness.browser.clone(),
    ));

    let input = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "1.0"}
        }}),
        json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {
            "name": "browser_navigate",
            "arguments": {"url": "https://example.com"}
        }}),
        json!({"jsonrpc": "2.0", "id": 3, "method": "shutdown"}),
        json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}),
    ]
    .iter()
    .map(|m| format!("{}\n\n", m))
    .collect::<String>();

    let mut output = Vec::new();
    server.serve(input.as_bytes(), &mut output).await.unwrap();

    let responses: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(responses.len(), 3, "no reply to the notification or after shutdown");
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(
        responses[1]["result"]["content"][0]["text"],
        "Navigated to https://example.com"
    );
    assert_eq!(responses[2]["id"], 3);
    assert!(harness.engine.tab(0).is_closed());
}

#[tokio::test]
async fn test_serve_closes_browser_on_eof() {
    let harness = Harness::new(ToolMode::NoSnapshot);
    harness.navigate("https://example.com").await;
    let server = McpServer::with_registry(ToolRegistry::new(
        harness.browser.clone(),
    ));

    server.serve(&b""[..], tokio::io::sink()).await.unwrap();
    assert!(harness.engine.tab(0).is_closed());
}
