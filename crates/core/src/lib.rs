#![deny(unused)]
//! Core types, traits, and error definitions for the code-mode bridge.
//!
//! This crate provides the building blocks shared by the registries, the
//! sandbox engine and the gateway: tagged tool definitions, the duplex
//! protocol messages, the tool server client seam and configuration.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{McpClient, McpConnector};
pub use types::*;
