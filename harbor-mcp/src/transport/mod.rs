//! Transport port: one contract over stdio, HTTP/SSE and WebSocket
//!
//! Transports are stateless with respect to the protocol. They deliver
//! whole frames tagged with a connection id and report connection
//! lifecycle through the event stream; the codec never reframes.

pub mod sse;
pub mod stdio;
pub mod websocket;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::McpResult;

/// Peer details captured when a connection opens
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub peer_address: String,
    pub user_agent: Option<String>,
    pub transport: &'static str,
}

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected {
        info: ConnectionInfo,
    },
    Message {
        connection_id: String,
        raw: String,
    },
    Disconnected {
        connection_id: String,
        reason: String,
    },
}

/// Sender half of a transport's event stream
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half of a transport's event stream
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// The uniform transport contract
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the transport, emitting events into `events` until the
    /// transport shuts down or fails.
    async fn run(&self, events: TransportEventSender) -> McpResult<()>;

    /// Deliver one framed message to a connection.
    async fn send(&self, connection_id: &str, message: String) -> McpResult<()>;

    /// Close a connection, ending its event flow.
    async fn close(&self, connection_id: &str, reason: &str) -> McpResult<()>;

    /// Short transport name for logs.
    fn name(&self) -> &'static str;
}
