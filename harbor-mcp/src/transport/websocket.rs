//! WebSocket transport: one JSON message per text frame

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::{ConnectionInfo, Transport, TransportEvent, TransportEventSender};
use crate::{McpError, McpResult};

#[derive(Clone)]
struct WsState {
    events: TransportEventSender,
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

pub struct WebSocketTransport {
    bind_address: String,
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl WebSocketTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            bind_address: format!("{}:{}", host, port),
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

async fn ws_handler(
    upgrade: WebSocketUpgrade,
    State(state): State<WsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    upgrade.on_upgrade(move |socket| handle_socket(socket, state, peer, user_agent))
}

async fn handle_socket(
    socket: WebSocket,
    state: WsState,
    peer: SocketAddr,
    user_agent: Option<String>,
) {
    let connection_id = Uuid::new_v4().to_string();
    tracing::info!(connection_id = %connection_id, peer = %peer, "WebSocket connection established");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    state
        .connections
        .write()
        .await
        .insert(connection_id.clone(), outbound_tx);

    let _ = state.events.send(TransportEvent::Connected {
        info: ConnectionInfo {
            connection_id: connection_id.clone(),
            peer_address: peer.ip().to_string(),
            user_agent,
            transport: "websocket",
        },
    });

    let (mut sink, mut stream) = socket.split();

    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(WsMessage::Text(message.into())).await.is_err() {
                tracing::debug!(connection_id = %writer_id, "WebSocket sink closed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reason = "connection closed".to_string();
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if state
                    .events
                    .send(TransportEvent::Message {
                        connection_id: connection_id.clone(),
                        raw: text.to_string(),
                    })
                    .is_err()
                {
                    reason = "server shutting down".to_string();
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => {
                reason = "client closed".to_string();
                break;
            }
            Ok(_) => {
                // Binary, ping and pong frames carry no protocol payload
            }
            Err(e) => {
                reason = format!("websocket error: {}", e);
                break;
            }
        }
    }

    writer.abort();
    state.connections.write().await.remove(&connection_id);
    let _ = state.events.send(TransportEvent::Disconnected {
        connection_id,
        reason,
    });
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn run(&self, events: TransportEventSender) -> McpResult<()> {
        let state = WsState {
            events,
            connections: self.connections.clone(),
        };
        let app = Router::new()
            .route("/mcp/ws", get(ws_handler))
            .with_state(state);

        tracing::info!(bind = %self.bind_address, "WebSocket transport listening");
        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| {
                McpError::transport(format!("failed to bind {}: {}", self.bind_address, e))
            })?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| McpError::transport(format!("WebSocket server error: {}", e)))?;
        Ok(())
    }

    async fn send(&self, connection_id: &str, message: String) -> McpResult<()> {
        let connections = self.connections.read().await;
        let tx = connections.get(connection_id).ok_or_else(|| {
            McpError::transport(format!("unknown WebSocket connection: {}", connection_id))
        })?;
        tx.send(message)
            .map_err(|_| McpError::transport("WebSocket closed"))
    }

    async fn close(&self, connection_id: &str, reason: &str) -> McpResult<()> {
        tracing::info!(connection_id, reason, "Closing WebSocket connection");
        self.connections.write().await.remove(connection_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
