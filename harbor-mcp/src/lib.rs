//! # Harbor MCP Server Core
//!
//! A Model Context Protocol (MCP) server: a JSON-RPC 2.0 front door that
//! exposes an internal tool/resource/prompt catalog to AI clients over
//! pluggable transports, with per-connection sessions, a layered
//! security pipeline, adaptive rate limiting, durable audit logging and
//! a tool-composition workflow engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   AI client         │
//! └──────────┬──────────┘
//!            │
//!     ┌──────┴──────────┐
//!     │    Transport    │  stdio / HTTP-SSE / WebSocket
//!     └──────┬──────────┘
//!            │
//! ┌──────────▼──────────┐
//! │    Server core      │  handshake, routing, session limits
//! │  ┌───────────────┐  │
//! │  │   Session     │  │  correlation, timeouts, subscriptions
//! │  └───────┬───────┘  │
//! │  ┌───────▼───────┐  │
//! │  │   Security    │  │  auth → IP → rate → authz → audit
//! │  └───────┬───────┘  │
//! │  ┌───────▼───────┐  │
//! │  │ Bridge /      │  │  catalog translation,
//! │  │ Workflows     │  │  composition DAGs
//! │  └───────────────┘  │
//! └─────────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod dlq;
pub mod error;
pub mod events;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod security;
pub mod server;
pub mod session;
pub mod transport;
pub mod workflow;

// Re-export commonly used types
pub use config::{ServerConfig, TransportKind};
pub use error::{McpError, McpResult};
pub use protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
    MCP_PROTOCOL_VERSION,
};
pub use server::{McpServer, McpServerBuilder};
pub use transport::{SseTransport, StdioTransport, Transport, WebSocketTransport};

/// Default timeout for MCP requests
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default maximum message size (in bytes)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
