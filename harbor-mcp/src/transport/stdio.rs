//! Stdio transport: newline-delimited JSON on stdin/stdout
//!
//! A single logical connection with id `stdio`. EOF on stdin disconnects.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use super::{ConnectionInfo, Transport, TransportEvent, TransportEventSender};
use crate::{McpError, McpResult};

/// The fixed connection id of the stdio peer
pub const STDIO_CONNECTION_ID: &str = "stdio";

pub struct StdioTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl StdioTransport {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn run(&self, events: TransportEventSender) -> McpResult<()> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| McpError::transport("stdio transport already running"))?;

        events
            .send(TransportEvent::Connected {
                info: ConnectionInfo {
                    connection_id: STDIO_CONNECTION_ID.to_string(),
                    peer_address: "stdio".to_string(),
                    user_agent: None,
                    transport: "stdio",
                },
            })
            .map_err(|_| McpError::transport("event channel closed"))?;

        // Writer task drains outbound messages onto stdout
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(message) = outbound_rx.recv().await {
                if stdout.write_all(message.as_bytes()).await.is_err() {
                    break;
                }
                if stdout.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdout.flush().await.is_err() {
                    break;
                }
            }
        });

        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tracing::info!("EOF on stdin, closing stdio transport");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if events
                        .send(TransportEvent::Message {
                            connection_id: STDIO_CONNECTION_ID.to_string(),
                            raw: trimmed.to_string(),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error reading from stdin");
                    break;
                }
            }
        }

        let _ = events.send(TransportEvent::Disconnected {
            connection_id: STDIO_CONNECTION_ID.to_string(),
            reason: "stdin closed".to_string(),
        });
        writer.abort();
        Ok(())
    }

    async fn send(&self, connection_id: &str, message: String) -> McpResult<()> {
        if connection_id != STDIO_CONNECTION_ID {
            return Err(McpError::transport(format!(
                "unknown stdio connection: {}",
                connection_id
            )));
        }
        self.outbound_tx
            .send(message)
            .map_err(|_| McpError::transport("stdio writer closed"))
    }

    async fn close(&self, _connection_id: &str, reason: &str) -> McpResult<()> {
        tracing::info!(reason, "Stdio transport close requested");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
