//! HTTP/SSE transport
//!
//! Inbound messages arrive as `POST /mcp/message/{connection_id}`;
//! outbound messages flow over `GET /mcp/sse/{connection_id}` as
//! `event: message` frames with a keep-alive every 30 seconds.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{sse::Event, sse::KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use super::{ConnectionInfo, Transport, TransportEvent, TransportEventSender};
use crate::{McpError, McpResult};

#[derive(Clone)]
struct SseState {
    events: TransportEventSender,
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

pub struct SseTransport {
    bind_address: String,
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl SseTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            bind_address: format!("{}:{}", host, port),
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn router(&self, events: TransportEventSender) -> Router {
        let state = SseState {
            events,
            connections: self.connections.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ]);

        Router::new()
            .route("/mcp/sse/{connection_id}", get(sse_handler))
            .route("/mcp/message/{connection_id}", post(message_handler))
            .route("/mcp/session", post(create_session_handler))
            .layer(cors)
            .with_state(state)
    }
}

/// Ends the connection's event flow when the SSE stream is dropped
struct DisconnectGuard {
    connection_id: String,
    events: TransportEventSender,
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let connections = self.connections.clone();
            let connection_id = self.connection_id.clone();
            handle.spawn(async move {
                connections.write().await.remove(&connection_id);
            });
        }
        let _ = self.events.send(TransportEvent::Disconnected {
            connection_id: self.connection_id.clone(),
            reason: "SSE stream closed".to_string(),
        });
    }
}

async fn sse_handler(
    Path(connection_id): Path<String>,
    State(state): State<SseState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(connection_id = %connection_id, peer = %peer, "SSE connection established");

    let (tx, mut rx) = mpsc::unbounded_channel();
    state
        .connections
        .write()
        .await
        .insert(connection_id.clone(), tx);

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let _ = state.events.send(TransportEvent::Connected {
        info: ConnectionInfo {
            connection_id: connection_id.clone(),
            peer_address: peer.ip().to_string(),
            user_agent,
            transport: "sse",
        },
    });

    let guard = DisconnectGuard {
        connection_id,
        events: state.events.clone(),
        connections: state.connections.clone(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(message) = rx.recv().await {
            yield Ok(Event::default().event("message").data(message));
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

async fn message_handler(
    Path(connection_id): Path<String>,
    State(state): State<SseState>,
    body: String,
) -> StatusCode {
    if !state.connections.read().await.contains_key(&connection_id) {
        return StatusCode::NOT_FOUND;
    }

    match state.events.send(TransportEvent::Message {
        connection_id,
        raw: body,
    }) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn create_session_handler() -> axum::Json<serde_json::Value> {
    let connection_id = Uuid::new_v4().to_string();
    axum::Json(serde_json::json!({
        "connection_id": connection_id,
        "sse_url": format!("/mcp/sse/{}", connection_id),
        "message_url": format!("/mcp/message/{}", connection_id),
    }))
}

#[async_trait]
impl Transport for SseTransport {
    async fn run(&self, events: TransportEventSender) -> McpResult<()> {
        let app = self.router(events);

        tracing::info!(bind = %self.bind_address, "SSE transport listening");
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
        .map_err(|e| McpError::transport(format!("SSE server error: {}", e)))?;
        Ok(())
    }

    async fn send(&self, connection_id: &str, message: String) -> McpResult<()> {
        let connections = self.connections.read().await;
        let tx = connections.get(connection_id).ok_or_else(|| {
            McpError::transport(format!("unknown SSE connection: {}", connection_id))
        })?;
        tx.send(message)
            .map_err(|_| McpError::transport("SSE stream closed"))
    }

    async fn close(&self, connection_id: &str, reason: &str) -> McpResult<()> {
        tracing::info!(connection_id, reason, "Closing SSE connection");
        // Dropping the sender ends the stream; the guard reports the
        // disconnect.
        self.connections.write().await.remove(connection_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sse"
    }
}
