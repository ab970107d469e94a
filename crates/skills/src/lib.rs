#![deny(unused)]
//! Tool catalogue for the code-mode bridge.
//!
//! This crate provides:
//! - Registry of tools registered by duplex connections
//! - Registry of tools introspected from configured tool servers
//! - Tool server client adapter over `rmcp` (stdio, streamable HTTP, SSE)
//! - TypeScript signature generation and the catalogue tree

pub mod external_registry;
pub mod mcp;
pub mod mcp_registry;
pub mod signature;
pub mod tree;

pub use external_registry::ExternalToolRegistry;
pub use mcp::DefaultMcpConnector;
pub use mcp_registry::McpRegistry;
pub use signature::{render_namespace, render_namespaces, tool_signature, ToolSignature};
pub use tree::{render_tree, TreeOptions};
