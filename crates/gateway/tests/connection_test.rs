use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use codemode_core::config::{BridgeConfig, RpcConfig};
use codemode_core::{ExecutionOutcome, OutboundMessage};
use codemode_gateway::CodeModeHost;
use codemode_sandbox::{ExecutionRequest, MockSandbox, SandboxEngine};
use codemode_skills::McpRegistry;

/// Sandbox stand-in that performs one `callTool` over the loopback RPC
/// server, then prints the returned data (or error) like a snippet would.
struct CallingSandbox {
    local_name: &'static str,
    tool: &'static str,
    args: Value,
}

#[async_trait]
impl SandboxEngine for CallingSandbox {
    async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let group = request
            .groups
            .iter()
            .find(|g| g.local_name == self.local_name)
            .expect("group present");
        let tool_ref = format!("{}.{}", group.namespace, self.tool);

        let response: Value = reqwest::Client::new()
            .post(format!("http://{}/rpc", request.rpc_addr))
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "callTool",
                "params": [tool_ref, self.args],
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let result = &response["result"];
        if result["success"] == json!(true) {
            ExecutionOutcome::succeeded(format!("{}\n", result["data"]))
        } else {
            ExecutionOutcome::succeeded(format!("{}\n", result["error"].as_str().unwrap()))
        }
    }

    async fn is_available(&self) -> bool {
        true
    }
}

async fn host_with(sandbox: Arc<dyn SandboxEngine>) -> CodeModeHost {
    CodeModeHost::start(
        Arc::new(McpRegistry::empty()),
        sandbox,
        &RpcConfig::default(),
        &BridgeConfig::default(),
    )
    .await
    .unwrap()
}

async fn next(rx: &mut UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message within 5s")
        .expect("channel open")
}

const REGISTER_ADD: &str = r#"{
    "type": "register_tools",
    "tools": [{
        "name": "add",
        "description": "Add two numbers",
        "inputSchema": {
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        },
        "outputSchema": {"type": "number"}
    }]
}"#;

fn signatures_of(message: OutboundMessage) -> String {
    match message {
        OutboundMessage::Signatures { content } => content,
        other => panic!("expected signatures, got {:?}", other),
    }
}

#[tokio::test]
async fn test_register_then_fetch_signatures() {
    let host = host_with(Arc::new(MockSandbox::default())).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(&id, REGISTER_ADD);
    assert_eq!(next(&mut rx).await, OutboundMessage::success("Registered 1 tools"));

    host.manager
        .handle_message(&id, r#"{"type":"get_signatures"}"#);
    let content = signatures_of(next(&mut rx).await);
    assert!(content.starts_with("declare namespace main {"));
    assert!(content.contains("Add two numbers"));
    assert!(content.contains("function add(args: { a: number; b: number }): Promise<number>;"));
}

#[tokio::test]
async fn test_signatures_are_isolated_per_connection() {
    let host = host_with(Arc::new(MockSandbox::default())).await;
    let (a, mut rx_a) = host.manager.open();
    let (b, mut rx_b) = host.manager.open();

    host.manager.handle_message(&a, REGISTER_ADD);
    next(&mut rx_a).await;
    host.manager.handle_message(
        &b,
        r#"{"type":"register_tools","tools":[{"name":"multiply"}]}"#,
    );
    next(&mut rx_b).await;

    host.manager.handle_message(&a, r#"{"type":"get_signatures"}"#);
    let content = signatures_of(next(&mut rx_a).await);
    assert!(content.contains("function add("));
    assert!(!content.contains("multiply"));

    host.manager.handle_message(&b, r#"{"type":"get_signatures"}"#);
    let content = signatures_of(next(&mut rx_b).await);
    assert!(content.contains("function multiply("));
    assert!(!content.contains("function add("));
}

#[tokio::test]
async fn test_duplicate_registration_and_close() {
    let host = host_with(Arc::new(MockSandbox::default())).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(&id, REGISTER_ADD);
    host.manager.handle_message(&id, REGISTER_ADD);
    assert_eq!(next(&mut rx).await, OutboundMessage::success("Registered 1 tools"));
    assert_eq!(next(&mut rx).await, OutboundMessage::success("Registered 1 tools"));
    assert_eq!(host.external.count_for(&id), 2);

    host.manager.close(&id);

    assert_eq!(host.external.count_for(&id), 0);
    assert!(host.external.group_for(&id).is_empty());
    assert!(!host.connections.is_open(&id));
    // Closing twice is harmless.
    host.manager.close(&id);
}

#[tokio::test]
async fn test_bad_registration_fails_only_that_request() {
    let host = host_with(Arc::new(MockSandbox::default())).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(
        &id,
        r#"{"type":"register_tools","tools":[{"name":"ok"},{"name":"bad","inputSchema":{"type":"object","properties":{"x":{"type":7}}}}]}"#,
    );
    assert!(matches!(next(&mut rx).await, OutboundMessage::Error { .. }));
    assert_eq!(host.external.count_for(&id), 0);

    host.manager.handle_message(&id, REGISTER_ADD);
    assert_eq!(next(&mut rx).await, OutboundMessage::success("Registered 1 tools"));
}

#[tokio::test]
async fn test_protocol_errors_keep_connection_open() {
    let host = host_with(Arc::new(MockSandbox::default())).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(&id, r#"{"type":"reboot"}"#);
    assert_eq!(
        next(&mut rx).await,
        OutboundMessage::error("Protocol error: Unknown message type: reboot")
    );

    host.manager.handle_message(&id, "{not json");
    assert!(matches!(next(&mut rx).await, OutboundMessage::Error { .. }));

    assert!(host.connections.is_open(&id));
    host.manager.handle_message(&id, REGISTER_ADD);
    assert_eq!(next(&mut rx).await, OutboundMessage::success("Registered 1 tools"));
}

#[tokio::test]
async fn test_execution_result_carries_output_and_error() {
    let sandbox = Arc::new(MockSandbox::new(vec![
        ExecutionOutcome::succeeded("hello\n"),
        ExecutionOutcome::failed("ReferenceError: x is not defined\n"),
    ]));
    let host = host_with(sandbox).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(
        &id,
        r#"{"type":"execute_code","executionId":"e1","code":"console.log('hello')"}"#,
    );
    assert_eq!(
        next(&mut rx).await,
        OutboundMessage::ExecutionResult {
            execution_id: "e1".into(),
            success: true,
            output: Some("hello\n".into()),
            error: None,
        }
    );

    host.manager.handle_message(
        &id,
        r#"{"type":"execute_code","executionId":"e2","code":"x","timeoutMs":250}"#,
    );
    match next(&mut rx).await {
        OutboundMessage::ExecutionResult {
            execution_id,
            success,
            error,
            ..
        } => {
            assert_eq!(execution_id, "e2");
            assert!(!success);
            assert_eq!(error.as_deref(), Some("ReferenceError: x is not defined\n"));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_registered_tool_called_from_sandbox() {
    let sandbox = Arc::new(CallingSandbox {
        local_name: "main",
        tool: "add",
        args: json!({"a": 2, "b": 3}),
    });
    let host = host_with(sandbox).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(&id, REGISTER_ADD);
    next(&mut rx).await;

    host.manager.handle_message(
        &id,
        r#"{"type":"execute_code","executionId":"run-1","code":"console.log(await main.add({a:2,b:3}))"}"#,
    );

    let call_id = match next(&mut rx).await {
        OutboundMessage::ToolCall {
            call_id,
            tool_name,
            args,
        } => {
            assert_eq!(tool_name, "add");
            assert_eq!(args, json!({"a": 2, "b": 3}));
            call_id
        }
        other => panic!("expected tool_call, got {:?}", other),
    };

    host.manager.handle_message(
        &id,
        &json!({"type": "tool_result", "callId": call_id, "result": 5}).to_string(),
    );

    match next(&mut rx).await {
        OutboundMessage::ExecutionResult {
            execution_id,
            success,
            output,
            ..
        } => {
            assert_eq!(execution_id, "run-1");
            assert!(success);
            assert!(output.unwrap().contains('5'));
        }
        other => panic!("expected execution_result, got {:?}", other),
    }
    assert_eq!(host.bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_unregistered_tool_reports_not_found() {
    let sandbox = Arc::new(CallingSandbox {
        local_name: "main",
        tool: "nope",
        args: json!({}),
    });
    let host = host_with(sandbox).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(
        &id,
        r#"{"type":"execute_code","executionId":"run-2","code":"await main.nope({})"}"#,
    );

    match next(&mut rx).await {
        OutboundMessage::ExecutionResult {
            success, output, ..
        } => {
            assert!(success);
            let output = output.unwrap();
            assert!(output.contains("Tool not found"));
            assert!(output.contains(&id.namespace()));
        }
        other => panic!("expected execution_result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_while_tool_call_pending() {
    let sandbox = Arc::new(CallingSandbox {
        local_name: "main",
        tool: "add",
        args: json!({"a": 1, "b": 1}),
    });
    let host = host_with(sandbox).await;
    let (id, mut rx) = host.manager.open();

    host.manager.handle_message(&id, REGISTER_ADD);
    next(&mut rx).await;
    host.manager.handle_message(
        &id,
        r#"{"type":"execute_code","executionId":"run-3","code":"await main.add({a:1,b:1})"}"#,
    );
    assert!(matches!(next(&mut rx).await, OutboundMessage::ToolCall { .. }));
    assert_eq!(host.bridge.pending_for(&id), 1);

    host.manager.close(&id);

    assert_eq!(host.bridge.pending_count(), 0);
    assert_eq!(host.external.count_for(&id), 0);
}
