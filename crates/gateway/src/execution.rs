//! Code execution: assembles the tool groups visible to a run and hands the
//! snippet to the sandbox engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codemode_core::{ConnectionId, ExecutionOutcome, ToolGroup};
use codemode_sandbox::{ExecutionRequest, SandboxEngine};
use codemode_skills::{ExternalToolRegistry, McpRegistry};

use crate::metrics;

pub struct CodeExecutor {
    sandbox: Arc<dyn SandboxEngine>,
    mcp: Arc<McpRegistry>,
    external: Arc<ExternalToolRegistry>,
    rpc_addr: SocketAddr,
}

impl CodeExecutor {
    pub fn new(
        sandbox: Arc<dyn SandboxEngine>,
        mcp: Arc<McpRegistry>,
        external: Arc<ExternalToolRegistry>,
        rpc_addr: SocketAddr,
    ) -> Self {
        Self {
            sandbox,
            mcp,
            external,
            rpc_addr,
        }
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// Every tool server group, plus the connection's own `main` group when
    /// the run belongs to a connection. `main` is present even when empty so
    /// calls to unregistered tools still reach the bridge.
    pub fn groups_for(&self, connection: Option<&ConnectionId>) -> Vec<ToolGroup> {
        let mut groups = self.mcp.groups(None, None);
        if let Some(connection_id) = connection {
            groups.push(self.external.group_for(connection_id));
        }
        groups
    }

    /// Run a snippet. `timeout` overrides the sandbox default.
    pub async fn execute(
        &self,
        code: &str,
        connection: Option<&ConnectionId>,
        timeout: Option<Duration>,
    ) -> ExecutionOutcome {
        let request = ExecutionRequest {
            code: code.to_string(),
            groups: self.groups_for(connection),
            rpc_addr: self.rpc_addr,
            timeout,
        };

        let started = Instant::now();
        let outcome = self.sandbox.execute(request).await;
        let elapsed = started.elapsed();

        metrics::track_execution(outcome.success, elapsed.as_secs_f64());
        tracing::debug!(
            success = outcome.success,
            output_len = outcome.output.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Execution finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemode_core::ToolDescriptor;
    use codemode_sandbox::MockSandbox;
    use serde_json::json;

    #[tokio::test]
    async fn test_connection_run_gets_main_group() {
        let sandbox = Arc::new(MockSandbox::new(vec![ExecutionOutcome::succeeded("5\n")]));
        let external = Arc::new(ExternalToolRegistry::new());
        let conn = ConnectionId::new();
        let add: ToolDescriptor = serde_json::from_value(json!({"name": "add"})).unwrap();
        external.register(&conn, vec![add]).unwrap();

        let executor = CodeExecutor::new(
            sandbox.clone(),
            Arc::new(McpRegistry::empty()),
            external,
            "127.0.0.1:4000".parse().unwrap(),
        );

        let outcome = executor
            .execute("console.log(5)", Some(&conn), Some(Duration::from_millis(500)))
            .await;
        assert!(outcome.success);

        let requests = sandbox.requests.lock().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].groups.len(), 1);
        assert_eq!(requests[0].groups[0].name, "main");
        assert_eq!(requests[0].timeout, Some(Duration::from_millis(500)));
        assert_eq!(requests[0].rpc_addr.port(), 4000);
    }

    #[tokio::test]
    async fn test_detached_run_has_no_main_group() {
        let executor = CodeExecutor::new(
            Arc::new(MockSandbox::default()),
            Arc::new(McpRegistry::empty()),
            Arc::new(ExternalToolRegistry::new()),
            "127.0.0.1:4000".parse().unwrap(),
        );
        assert!(executor.groups_for(None).is_empty());
        assert_eq!(executor.groups_for(Some(&ConnectionId::new())).len(), 1);
    }
}
