//! Shared test harness: a channel-backed transport driving a real server
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};

use harbor_mcp::bridge::{ParamType, ParameterDescriptor, ToolDescriptor, ToolOutput};
use harbor_mcp::registry::{InMemoryCatalog, InMemoryTemplateRegistry};
use harbor_mcp::transport::{ConnectionInfo, Transport, TransportEvent, TransportEventSender};
use harbor_mcp::{McpError, McpResult, McpServer, McpServerBuilder, ServerConfig};

/// Transport backed by in-memory channels
pub struct ChannelTransport {
    inbox: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    outbox_tx: mpsc::UnboundedSender<(String, String)>,
    closed: Arc<RwLock<Vec<(String, String)>>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn run(&self, events: TransportEventSender) -> McpResult<()> {
        let mut inbox = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or_else(|| McpError::transport("already running"))?;
        while let Some(event) = inbox.recv().await {
            if events.send(event).is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn send(&self, connection_id: &str, message: String) -> McpResult<()> {
        self.outbox_tx
            .send((connection_id.to_string(), message))
            .map_err(|_| McpError::transport("outbox closed"))
    }

    async fn close(&self, connection_id: &str, reason: &str) -> McpResult<()> {
        self.closed
            .write()
            .await
            .push((connection_id.to_string(), reason.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

pub struct TestServer {
    pub server: Arc<McpServer>,
    inbox_tx: mpsc::UnboundedSender<TransportEvent>,
    outbox_rx: mpsc::UnboundedReceiver<(String, String)>,
    closed: Arc<RwLock<Vec<(String, String)>>>,
    run_task: tokio::task::JoinHandle<McpResult<()>>,
}

impl TestServer {
    pub async fn start(config: ServerConfig, catalog: InMemoryCatalog) -> TestServer {
        Self::start_with(config, catalog, InMemoryTemplateRegistry::new()).await
    }

    pub async fn start_with(
        config: ServerConfig,
        catalog: InMemoryCatalog,
        templates: InMemoryTemplateRegistry,
    ) -> TestServer {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(RwLock::new(Vec::new()));

        let transport = Arc::new(ChannelTransport {
            inbox: Mutex::new(Some(inbox_rx)),
            outbox_tx,
            closed: closed.clone(),
        });

        let server = McpServerBuilder::new(config)
            .with_transport(transport)
            .with_catalog(Arc::new(catalog))
            .with_templates(Arc::new(templates))
            .build()
            .expect("server builds");

        let runner = server.clone();
        let run_task = tokio::spawn(async move { runner.run().await });
        // Give the event loop a beat to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        TestServer {
            server,
            inbox_tx,
            outbox_rx,
            closed,
            run_task,
        }
    }

    pub fn connect(&self, connection_id: &str) {
        self.inbox_tx
            .send(TransportEvent::Connected {
                info: ConnectionInfo {
                    connection_id: connection_id.to_string(),
                    peer_address: "10.1.2.3".to_string(),
                    user_agent: Some("test-client/1.0".to_string()),
                    transport: "channel",
                },
            })
            .expect("event delivered");
    }

    pub fn send_raw(&self, connection_id: &str, raw: &str) {
        self.inbox_tx
            .send(TransportEvent::Message {
                connection_id: connection_id.to_string(),
                raw: raw.to_string(),
            })
            .expect("event delivered");
    }

    pub fn disconnect(&self, connection_id: &str) {
        self.inbox_tx
            .send(TransportEvent::Disconnected {
                connection_id: connection_id.to_string(),
                reason: "test disconnect".to_string(),
            })
            .expect("event delivered");
    }

    /// Next message the server sent to a connection.
    pub async fn recv_from(&mut self, connection_id: &str) -> Value {
        loop {
            let (conn, raw) = tokio::time::timeout(Duration::from_secs(5), self.outbox_rx.recv())
                .await
                .expect("timed out waiting for outbound message")
                .expect("outbox closed");
            if conn == connection_id {
                return serde_json::from_str(&raw).expect("valid JSON out");
            }
        }
    }

    /// Run the full S1 handshake and return the initialize result.
    pub async fn initialize(&mut self, connection_id: &str) -> Value {
        self.connect(connection_id);
        self.send_raw(
            connection_id,
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "clientInfo": {"name": "test", "version": "0.0"}
                }
            })
            .to_string(),
        );
        self.recv_from(connection_id).await
    }

    pub async fn was_closed(&self, connection_id: &str) -> bool {
        // Close records land asynchronously
        for _ in 0..50 {
            if self
                .closed
                .read()
                .await
                .iter()
                .any(|(conn, _)| conn == connection_id)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.run_task.abort();
    }
}

/// Catalog with the tools the scenario tests exercise
pub async fn scenario_catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();

    catalog
        .register_tool(
            ToolDescriptor {
                name: "echo".into(),
                description: "Echo text".into(),
                parameters: vec![ParameterDescriptor::new("text", ParamType::String).required()],
                category: "test".into(),
                version: "1.0".into(),
                execution: Default::default(),
            },
            |params, _invocation| async move {
                Ok(ToolOutput::Text(
                    params["text"].as_str().unwrap_or_default().to_string(),
                ))
            },
        )
        .await;

    for (name, output) in [("A", "a"), ("B", "b")] {
        let fixed = output.to_string();
        catalog
            .register_tool(
                ToolDescriptor {
                    name: name.into(),
                    description: format!("Emit {}", output),
                    parameters: vec![],
                    category: "test".into(),
                    version: "1.0".into(),
                    execution: Default::default(),
                },
                move |_params, _invocation| {
                    let fixed = fixed.clone();
                    async move { Ok(ToolOutput::Text(fixed)) }
                },
            )
            .await;
    }

    catalog
        .register_tool(
            ToolDescriptor {
                name: "M".into(),
                description: "Concatenate the outputs of A and B".into(),
                parameters: vec![],
                category: "test".into(),
                version: "1.0".into(),
                execution: Default::default(),
            },
            |params, _invocation| async move {
                let a = params["a"].as_str().unwrap_or("?");
                let b = params["b"].as_str().unwrap_or("?");
                Ok(ToolOutput::Text(format!("{}+{}", a, b)))
            },
        )
        .await;

    catalog
}
