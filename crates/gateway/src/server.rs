//! Axum-based HTTP server: the duplex WebSocket endpoint plus the HTTP
//! control surface.

use axum::{
    extract::{ws::WebSocketUpgrade, Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use codemode_core::{config::ServerConfig, Error, ExecutionOutcome, Result};
use codemode_skills::{render_namespaces, render_tree, McpRegistry, TreeOptions};

use crate::connection::{serve_socket, ConnectionManager};
use crate::execution::CodeExecutor;
use crate::host::CodeModeHost;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Enable CORS.
    pub enable_cors: bool,
    /// Enable request tracing.
    pub enable_tracing: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for GatewayConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
            enable_tracing: config.enable_tracing,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    pub mcp: Arc<McpRegistry>,
    pub executor: Arc<CodeExecutor>,
}

/// Gateway server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
    metrics_handle: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig, host: &CodeModeHost) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                manager: host.manager.clone(),
                mcp: host.mcp.clone(),
                executor: host.executor.clone(),
            }),
            metrics_handle: None,
        }
    }

    /// Set metrics handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Build the Axum router.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/tree", get(tree_handler))
            .route("/signatures", get(signatures_handler))
            .route("/exec", post(exec_handler))
            .with_state(self.state.clone());

        if let Some(handle) = &self.metrics_handle {
            let handle = handle.clone();
            router = router.route("/metrics", get(move || async move { handle.render() }));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::config(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!(addr = %addr, "Gateway server starting");

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Connected tool servers.
    pub servers: usize,
    /// Tools served by them.
    pub tools: usize,
}

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    pub tree: String,
}

/// Comma-separated filters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturesQuery {
    pub server_names: Option<String>,
    pub tool_names: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignaturesResponse {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    pub code: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Handlers
// =============================================================================

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let manager = state.manager.clone();
    ws.on_upgrade(move |socket| serve_socket(manager, socket))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        servers: state.mcp.server_count(),
        tools: state.mcp.tool_count(),
    })
}

async fn tree_handler(
    State(state): State<Arc<AppState>>,
    Query(options): Query<TreeOptions>,
) -> impl IntoResponse {
    let groups = state.mcp.groups(None, None);
    Json(TreeResponse {
        tree: render_tree(&groups, &options),
    })
}

async fn signatures_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignaturesQuery>,
) -> impl IntoResponse {
    let server_names = split_list(query.server_names.as_deref());
    let tool_names = split_list(query.tool_names.as_deref());
    let groups = state
        .mcp
        .groups(server_names.as_deref(), tool_names.as_deref());

    match render_namespaces(&groups) {
        Ok(content) => (StatusCode::OK, Json(SignaturesResponse { content })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to render signatures");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Runs with tool server tools only; there is no connection to call back.
async fn exec_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecRequest>,
) -> Json<ExecutionOutcome> {
    let outcome = state
        .executor
        .execute(
            &request.code,
            None,
            request.timeout_ms.map(Duration::from_millis),
        )
        .await;
    Json(outcome)
}

fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
}
