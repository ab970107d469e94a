#![deny(unused)]
//! Gateway for the code-mode bridge.
//!
//! This crate hosts the duplex WebSocket endpoint, the tool bridge with its
//! loopback JSON-RPC server, code execution wiring and the HTTP control
//! surface.

pub mod bridge;
pub mod connection;
pub mod execution;
pub mod host;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod tracing_layer;

pub use bridge::{normalize_mcp_result, ToolBridge};
pub use connection::{serve_socket, ConnectionManager, ConnectionTable};
pub use execution::CodeExecutor;
pub use host::CodeModeHost;
pub use metrics::setup_metrics_recorder;
pub use rpc::{rpc_router, RpcServer};
pub use server::{GatewayConfig, GatewayServer};
pub use tracing_layer::configure_tracing;
