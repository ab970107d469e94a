//! Core type definitions for the code-mode bridge.
//!
//! Broken down into submodules:
//! - `tool`: tool definitions, identifiers and input guards
//! - `mcp`: tool server wire types
//! - `protocol`: duplex connection messages
//! - `execution`: sandbox run results

pub mod execution;
pub mod mcp;
pub mod protocol;
pub mod tool;

pub use execution::*;
pub use mcp::*;
pub use protocol::*;
pub use tool::*;
