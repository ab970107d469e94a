#![deny(unused)]
//! Sandboxed execution of generated code.
//!
//! Wraps a snippet with a loopback RPC client and tool proxies, then runs it
//! in a permission-restricted Deno subprocess under a wall-clock limit.

pub mod engine;
pub mod program;

pub use engine::{
    run_with_timeout, DenoSandbox, ExecutionRequest, MockSandbox, SandboxConfig, SandboxEngine,
};
pub use program::{assemble_program, proxy_object, rpc_stub, rpc_url};
