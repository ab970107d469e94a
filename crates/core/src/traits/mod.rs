//! Core traits for the code-mode bridge.
//!
//! - `mcp`: tool server client and connector seams

pub mod mcp;

pub use mcp::{McpClient, McpConnector};
