//! Duplex connection handling.
//!
//! Each connection gets an id and an unbounded outbound channel drained by a
//! single writer task. Inbound frames are dispatched by `type`; every handler
//! error is answered with an `error` message and the connection stays open.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use codemode_core::{
    ConnectionId, Error, InboundMessage, OutboundMessage, Result, ToolDescriptor, ToolGroup,
    EXTERNAL_LOCAL_NAME,
};
use codemode_skills::{render_namespaces, ExternalToolRegistry, McpRegistry};

use crate::bridge::ToolBridge;
use crate::execution::CodeExecutor;
use crate::metrics;

pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundMessage>;

// =============================================================================
// Connection Table
// =============================================================================

/// Open connections and their outbound channels.
#[derive(Default)]
pub struct ConnectionTable {
    senders: DashMap<ConnectionId, OutboundSender>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection_id: ConnectionId, sender: OutboundSender) {
        self.senders.insert(connection_id, sender);
    }

    pub fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.senders.remove(connection_id).is_some()
    }

    pub fn is_open(&self, connection_id: &ConnectionId) -> bool {
        self.senders
            .get(connection_id)
            .map_or(false, |sender| !sender.is_closed())
    }

    /// Queue a message for a connection's writer.
    pub fn send(&self, connection_id: &ConnectionId, message: OutboundMessage) -> Result<()> {
        let sender = self
            .senders
            .get(connection_id)
            .ok_or_else(|| Error::connection_unavailable(connection_id.to_string()))?;
        sender
            .send(message)
            .map_err(|_| Error::connection_unavailable(connection_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

pub struct ConnectionManager {
    connections: Arc<ConnectionTable>,
    external: Arc<ExternalToolRegistry>,
    mcp: Arc<McpRegistry>,
    bridge: Arc<ToolBridge>,
    executor: Arc<CodeExecutor>,
}

impl ConnectionManager {
    pub fn new(
        connections: Arc<ConnectionTable>,
        external: Arc<ExternalToolRegistry>,
        mcp: Arc<McpRegistry>,
        bridge: Arc<ToolBridge>,
        executor: Arc<CodeExecutor>,
    ) -> Self {
        Self {
            connections,
            external,
            mcp,
            bridge,
            executor,
        }
    }

    /// Accept a connection. The receiver yields every message addressed to it.
    pub fn open(&self) -> (ConnectionId, OutboundReceiver) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection_id.clone(), tx);
        metrics::track_connections(self.connections.len());
        tracing::info!(connection_id = %connection_id, "Connection opened");
        (connection_id, rx)
    }

    /// Tear down a connection: forget it, drop its tools and reject its
    /// pending calls. Safe to call more than once.
    ///
    /// The table entry goes first so no call can park on the connection
    /// after the rejection sweep.
    pub fn close(&self, connection_id: &ConnectionId) {
        let was_open = self.connections.remove(connection_id);
        let removed_tools = self.external.unregister(connection_id);
        let rejected = self.bridge.connection_closed(connection_id);
        metrics::track_connections(self.connections.len());
        if was_open {
            tracing::info!(
                connection_id = %connection_id,
                removed_tools,
                rejected_calls = rejected,
                "Connection closed"
            );
        }
    }

    /// Dispatch one inbound text frame.
    pub fn handle_message(self: &Arc<Self>, connection_id: &ConnectionId, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Rejected message");
                self.reply(connection_id, OutboundMessage::error(e.to_string()));
                return;
            }
        };
        tracing::debug!(connection_id = %connection_id, kind = message.kind(), "Received message");

        let response = match message {
            InboundMessage::RegisterTools { tools } => self.register_tools(connection_id, tools),
            InboundMessage::GetSignatures {
                server_names,
                tool_names,
            } => self.signatures(connection_id, server_names.as_deref(), tool_names.as_deref()),
            InboundMessage::ExecuteCode {
                execution_id,
                code,
                timeout_ms,
            } => {
                self.spawn_execution(connection_id, execution_id, code, timeout_ms);
                return;
            }
            InboundMessage::ToolResult {
                call_id,
                result,
                error,
            } => {
                self.bridge
                    .deliver_result(connection_id, &call_id, result, error);
                return;
            }
        };

        let reply = response.unwrap_or_else(|e| OutboundMessage::error(e.to_string()));
        self.reply(connection_id, reply);
    }

    fn register_tools(
        &self,
        connection_id: &ConnectionId,
        tools: Vec<ToolDescriptor>,
    ) -> Result<OutboundMessage> {
        let registered = self.external.register(connection_id, tools)?;
        tracing::info!(
            connection_id = %connection_id,
            count = registered.len(),
            "Registered connection tools"
        );
        Ok(OutboundMessage::success(format!(
            "Registered {} tools",
            registered.len()
        )))
    }

    fn signatures(
        &self,
        connection_id: &ConnectionId,
        server_names: Option<&[String]>,
        tool_names: Option<&[String]>,
    ) -> Result<OutboundMessage> {
        let mut groups = self.mcp.groups(server_names, tool_names);
        if server_names.map_or(true, |names| names.iter().any(|n| n == EXTERNAL_LOCAL_NAME)) {
            let own = filter_group(self.external.group_for(connection_id), tool_names);
            if !own.is_empty() {
                groups.push(own);
            }
        }
        let content = render_namespaces(&groups)?;
        Ok(OutboundMessage::Signatures { content })
    }

    /// Run on a separate task so `tool_result` frames keep flowing while the
    /// sandbox waits on them.
    fn spawn_execution(
        self: &Arc<Self>,
        connection_id: &ConnectionId,
        execution_id: String,
        code: String,
        timeout_ms: Option<u64>,
    ) {
        let manager = Arc::clone(self);
        let connection_id = connection_id.clone();
        tokio::spawn(async move {
            tracing::info!(
                connection_id = %connection_id,
                execution_id = %execution_id,
                "Executing code"
            );
            let outcome = manager
                .executor
                .execute(
                    &code,
                    Some(&connection_id),
                    timeout_ms.map(Duration::from_millis),
                )
                .await;

            let error = (!outcome.success).then(|| outcome.output.clone());
            manager.reply(
                &connection_id,
                OutboundMessage::ExecutionResult {
                    execution_id,
                    success: outcome.success,
                    output: Some(outcome.output),
                    error,
                },
            );
        });
    }

    fn reply(&self, connection_id: &ConnectionId, message: OutboundMessage) {
        if let Err(e) = self.connections.send(connection_id, message) {
            tracing::debug!(connection_id = %connection_id, error = %e, "Dropped outbound message");
        }
    }
}

/// Keep only tools whose raw or reference name is listed.
fn filter_group(mut group: ToolGroup, tool_names: Option<&[String]>) -> ToolGroup {
    if let Some(wanted) = tool_names {
        group
            .tools
            .retain(|tool| wanted.contains(&tool.name) || wanted.contains(&tool.reference_name));
    }
    group
}

/// Drive a WebSocket for its whole life.
pub async fn serve_socket(manager: Arc<ConnectionManager>, socket: WebSocket) {
    let (connection_id, mut outbound) = manager.open();
    let (mut sink, mut stream) = socket.split();

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(connection_id = %writer_id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => manager.handle_message(&connection_id, &text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => manager.handle_message(&connection_id, &text),
                Err(_) => manager.reply(
                    &connection_id,
                    OutboundMessage::error("Binary frames must contain UTF-8 JSON"),
                ),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    manager.close(&connection_id);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_table_send_and_remove() {
        let table = ConnectionTable::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.insert(id.clone(), tx);

        assert!(table.is_open(&id));
        table.send(&id, OutboundMessage::success("hi")).unwrap();
        assert_eq!(rx.recv().await, Some(OutboundMessage::success("hi")));

        assert!(table.remove(&id));
        assert!(!table.is_open(&id));
        assert!(matches!(
            table.send(&id, OutboundMessage::success("gone")),
            Err(Error::ConnectionUnavailable(_))
        ));
    }

    #[test]
    fn test_dropped_receiver_is_not_open() {
        let table = ConnectionTable::new();
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        table.insert(id.clone(), tx);
        drop(rx);
        assert!(!table.is_open(&id));
    }
}
