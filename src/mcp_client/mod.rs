//! MCP client side — JSON-RPC transports and per-server protocol clients.
//!
//! This module handles:
//! - Newline-delimited JSON-RPC over a spawned server's stdio
//! - JSON-RPC over HTTP POST
//! - The `initialize` / `initialized` handshake and client state machine
//! - `tools/list` and `tools/call`
//! - The tool registry that maps bare tool names to their owning client
//!
//! The registry is consumed by the agent's `ToolRouter`.

pub mod client;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientState, McpClient};
pub use errors::McpError;
pub use registry::{RegisteredTool, ToolRegistry};
pub use transport::{StdioTransport, Transport};
pub use types::{McpToolDefinition, ServerConfig, ServersConfig};
