//! Server core: connection acceptance, the initialize handshake,
//! message routing to sessions and graceful shutdown

pub mod handler;

pub use handler::{LocalSampler, McpRequestHandler, SamplingBackend};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::bridge::{ToolBridge, ToolCatalog};
use crate::config::ServerConfig;
use crate::delivery::DeliveryQueue;
use crate::dlq::{DeadLetterQueue, SignalRouter};
use crate::events::EventBus;
use crate::metrics::{names, MetricsRegistry};
use crate::protocol::{
    methods, InitializeParams, InitializeResult, JsonRpcErrorResponse, JsonRpcResponse, Message,
    RequestId, ServerCapabilities, ServerInfo, MCP_PROTOCOL_VERSION,
};
use crate::registry::{ClientRegistry, CompositionRegistry, TemplateRegistry};
use crate::security::{
    AllowAllGeoProvider, AuditSink, GeoProvider, IdentityProvider, MemoryAuditSink,
    SecurityPipeline, StaticIdentityProvider,
};
use crate::session::{Session, SessionInfo, SessionLimits, SessionSignal};
use crate::transport::{ConnectionInfo, Transport, TransportEvent};
use crate::workflow::{TriggerManager, WorkflowEngine};
use crate::{McpError, McpResult};
use harbor_resilience::ShutdownCoordinator;

/// Maintenance cadence for security/session upkeep
const MAINTENANCE_TICK: Duration = Duration::from_secs(60);

/// Point-in-time server status
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub active_sessions: usize,
    pub shutdown_requested: bool,
    pub started_at: DateTime<Utc>,
    pub protocol_version: &'static str,
}

struct ServerState {
    sessions: HashMap<String, Arc<Session>>,
    /// Connections that have not completed the handshake yet
    connections: HashMap<String, ConnectionInfo>,
    pumps: HashMap<String, tokio::task::JoinHandle<()>>,
}

/// Routes dead-lettered delivery signals back onto the transport
struct RedeliveryRouter {
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl SignalRouter for RedeliveryRouter {
    async fn route(&self, signal: &Value) -> McpResult<()> {
        match signal.get("kind").and_then(Value::as_str) {
            Some("undeliverable_message") => {
                let connection_id = signal
                    .get("connectionId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| McpError::internal("signal missing connectionId"))?;
                let message = signal
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| McpError::internal("signal missing message"))?;
                self.transport.send(connection_id, message.to_string()).await
            }
            other => Err(McpError::internal(format!(
                "no route for signal kind {:?}",
                other
            ))),
        }
    }
}

/// The MCP server core
pub struct McpServer {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    handler: Arc<McpRequestHandler>,
    security: Arc<SecurityPipeline>,
    bus: Arc<EventBus>,
    metrics: MetricsRegistry,
    clients: Arc<ClientRegistry>,
    dlq: Arc<DeadLetterQueue>,
    delivery: Arc<DeliveryQueue>,
    state: RwLock<ServerState>,
    signals_tx: mpsc::UnboundedSender<SessionSignal>,
    signals_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionSignal>>>,
    shutdown: ShutdownCoordinator,
    shutdown_requested: RwLock<bool>,
    started_at: DateTime<Utc>,
}

impl McpServer {
    /// Run the event loop until the transport ends or shutdown completes.
    pub async fn run(self: &Arc<Self>) -> McpResult<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let transport = self.transport.clone();
        let transport_task = tokio::spawn(async move { transport.run(events_tx).await });

        let router: Arc<dyn SignalRouter> = Arc::new(RedeliveryRouter {
            transport: self.transport.clone(),
        });
        let dlq_task = self.dlq.start(router);

        let mut signals_rx = self
            .signals_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| McpError::internal("server already running"))?;

        let mut maintenance = tokio::time::interval(MAINTENANCE_TICK);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            transport = self.transport.name(),
            protocol = MCP_PROTOCOL_VERSION,
            "MCP server running"
        );

        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => {
                        tracing::info!("Transport event stream ended");
                        break;
                    }
                },
                signal = signals_rx.recv() => {
                    if let Some(signal) = signal {
                        self.on_session_signal(signal).await;
                    }
                }
                _ = maintenance.tick() => {
                    self.security.maintain().await;
                }
            }
        }

        dlq_task.abort();
        transport_task.abort();
        Ok(())
    }

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected { info } => {
                if *self.shutdown_requested.read().await {
                    let _ = self
                        .transport
                        .close(&info.connection_id, "server is shutting down")
                        .await;
                    return;
                }
                tracing::debug!(
                    connection_id = %info.connection_id,
                    peer = %info.peer_address,
                    "Connection opened"
                );
                self.state
                    .write()
                    .await
                    .connections
                    .insert(info.connection_id.clone(), info);
            }

            TransportEvent::Message { connection_id, raw } => {
                if raw.len() > self.config.security.request_max_size_bytes {
                    let err = McpError::RequestTooLarge {
                        size: raw.len(),
                        limit: self.config.security.request_max_size_bytes,
                    };
                    self.send_error(&connection_id, crate::protocol::jsonrpc::derive_id(&raw), err)
                        .await;
                    return;
                }

                let session = self.state.read().await.sessions.get(&connection_id).cloned();
                match session {
                    Some(session) => session.deliver(&raw).await,
                    None => self.handle_handshake(&connection_id, &raw).await,
                }
            }

            TransportEvent::Disconnected {
                connection_id,
                reason,
            } => {
                tracing::debug!(connection_id = %connection_id, reason = %reason, "Connection closed");
                let session = {
                    let mut state = self.state.write().await;
                    state.connections.remove(&connection_id);
                    state.sessions.get(&connection_id).cloned()
                };
                if let Some(session) = session {
                    session.terminate().await;
                }
            }
        }
    }

    /// First message on a fresh connection must be an `initialize`
    /// request with an exactly-matching protocol version. Every failure
    /// mode answers and closes the connection.
    async fn handle_handshake(self: &Arc<Self>, connection_id: &str, raw: &str) {
        if *self.shutdown_requested.read().await {
            self.refuse(connection_id, None, McpError::internal("server is shutting down"))
                .await;
            return;
        }

        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                let id = crate::protocol::jsonrpc::derive_id(raw);
                self.refuse(connection_id, id, err).await;
                return;
            }
        };

        let request = match message {
            Message::Request(request) if request.method == methods::INITIALIZE => request,
            Message::Request(request) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    method = %request.method,
                    "Method before initialize"
                );
                self.refuse(
                    connection_id,
                    None,
                    McpError::invalid_request("initialize must be the first request"),
                )
                .await;
                return;
            }
            _ => {
                self.refuse(
                    connection_id,
                    None,
                    McpError::invalid_request("expected an initialize request"),
                )
                .await;
                return;
            }
        };

        let params: InitializeParams = match request.params.clone() {
            Some(params) => match serde_json::from_value(params) {
                Ok(params) => params,
                Err(e) => {
                    self.refuse(
                        connection_id,
                        Some(request.id),
                        McpError::invalid_params(methods::INITIALIZE, e.to_string()),
                    )
                    .await;
                    return;
                }
            },
            None => {
                self.refuse(
                    connection_id,
                    Some(request.id),
                    McpError::invalid_params(methods::INITIALIZE, "missing parameters"),
                )
                .await;
                return;
            }
        };

        if !crate::protocol::protocol_version_compatible(&params.protocol_version) {
            self.refuse(
                connection_id,
                Some(request.id),
                McpError::invalid_params(
                    methods::INITIALIZE,
                    format!(
                        "Incompatible protocol version: {} (server speaks {})",
                        params.protocol_version, MCP_PROTOCOL_VERSION
                    ),
                ),
            )
            .await;
            return;
        }

        {
            let state = self.state.read().await;
            if state.sessions.len() >= self.config.session.max_sessions {
                drop(state);
                self.metrics.incr(names::SESSIONS_REFUSED).await;
                self.refuse(
                    connection_id,
                    Some(request.id),
                    McpError::internal(format!(
                        "session limit ({}) reached",
                        self.config.session.max_sessions
                    )),
                )
                .await;
                return;
            }
        }

        self.create_session(connection_id, request.id, params).await;
    }

    async fn create_session(
        self: &Arc<Self>,
        connection_id: &str,
        request_id: RequestId,
        params: InitializeParams,
    ) {
        let connect_info = self
            .state
            .read()
            .await
            .connections
            .get(connection_id)
            .cloned()
            .unwrap_or_else(|| ConnectionInfo {
                connection_id: connection_id.to_string(),
                peer_address: "unknown".to_string(),
                user_agent: None,
                transport: self.transport.name(),
            });

        // Ordered outbound pump: everything the session emits flows
        // through one queue to the transport
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let transport = self.transport.clone();
        let pump_conn = connection_id.to_string();
        let pump = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = transport.send(&pump_conn, message).await {
                    tracing::debug!(connection_id = %pump_conn, error = %e, "Outbound send failed");
                    break;
                }
            }
        });

        let capabilities =
            ServerCapabilities::default().with_overrides(&self.config.capabilities);

        let session = Session::new(
            connection_id.to_string(),
            params.client_info.clone(),
            connect_info,
            capabilities.clone(),
            outbound_tx.clone(),
            self.signals_tx.clone(),
            self.bus.clone(),
            self.handler.clone(),
            SessionLimits {
                request_timeout: self.config.protocol.request_timeout(),
                max_concurrent_requests: self.config.session.max_concurrent_requests,
            },
        );

        {
            let mut state = self.state.write().await;
            state.sessions.insert(connection_id.to_string(), session);
            state.pumps.insert(connection_id.to_string(), pump);
        }
        self.clients
            .register(
                connection_id,
                &params.client_info.name,
                &params.client_info.version,
            )
            .await;
        self.shutdown.task_started().await;
        self.metrics
            .set_gauge(
                names::SESSIONS_ACTIVE,
                self.state.read().await.sessions.len() as i64,
            )
            .await;

        tracing::info!(
            session_id = %connection_id,
            client = %params.client_info.name,
            version = %params.client_info.version,
            "Session initialized"
        );

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities,
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                metadata: HashMap::new(),
            },
        };

        match serde_json::to_value(&result) {
            Ok(value) => {
                let response = Message::Response(JsonRpcResponse::new(request_id, value));
                if let Ok(encoded) = response.encode() {
                    let _ = outbound_tx.send(encoded);
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode initialize result"),
        }
    }

    /// Answer a handshake failure and close the connection.
    async fn refuse(&self, connection_id: &str, id: Option<RequestId>, err: McpError) {
        self.send_error(connection_id, id, err).await;
        let _ = self.transport.close(connection_id, "handshake failed").await;
        self.state.write().await.connections.remove(connection_id);
    }

    async fn send_error(&self, connection_id: &str, id: Option<RequestId>, err: McpError) {
        let message = Message::Error(JsonRpcErrorResponse::new(id, err.into()));
        match message.encode() {
            Ok(encoded) => {
                if let Err(e) = self.transport.send(connection_id, encoded).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Failed to send error");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode error response"),
        }
    }

    async fn on_session_signal(self: &Arc<Self>, signal: SessionSignal) {
        match signal {
            SessionSignal::Terminated { session_id } => {
                let removed = {
                    let mut state = self.state.write().await;
                    // The pump drains whatever the session already queued
                    // and exits when its channel closes
                    state.pumps.remove(&session_id);
                    state.sessions.remove(&session_id)
                };
                if removed.is_some() {
                    self.clients.unregister(&session_id).await;
                    self.shutdown.task_completed().await;
                    let _ = self.transport.close(&session_id, "session terminated").await;
                    self.metrics
                        .set_gauge(
                            names::SESSIONS_ACTIVE,
                            self.state.read().await.sessions.len() as i64,
                        )
                        .await;
                }
            }

            SessionSignal::CloseConnection { session_id, reason } => {
                tracing::warn!(session_id = %session_id, reason = %reason, "Closing connection on session request");
                let _ = self.transport.close(&session_id, &reason).await;
                let session = self.state.read().await.sessions.get(&session_id).cloned();
                if let Some(session) = session {
                    session.terminate().await;
                }
            }
        }
    }

    /// Send a notification to one session.
    pub async fn notify(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<()> {
        let session = self
            .state
            .read()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| McpError::session(format!("unknown session: {}", session_id)))?;
        session.notify(method, params).await;
        self.metrics.incr(names::NOTIFICATIONS_SENT).await;
        Ok(())
    }

    /// Send a notification to every live session.
    pub async fn broadcast(&self, method: &str, params: Option<Value>) {
        let sessions: Vec<Arc<Session>> =
            self.state.read().await.sessions.values().cloned().collect();
        for session in sessions {
            session.notify(method, params.clone()).await;
            self.metrics.incr(names::NOTIFICATIONS_SENT).await;
        }
    }

    pub async fn status(&self) -> ServerStatus {
        ServerStatus {
            active_sessions: self.state.read().await.sessions.len(),
            shutdown_requested: *self.shutdown_requested.read().await,
            started_at: self.started_at,
            protocol_version: MCP_PROTOCOL_VERSION,
        }
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> =
            self.state.read().await.sessions.values().cloned().collect();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos
    }

    /// Graceful shutdown: refuse new connections, warn every session,
    /// give in-flight work the grace period, then force-terminate.
    pub async fn shutdown(self: &Arc<Self>) -> McpResult<()> {
        {
            let mut requested = self.shutdown_requested.write().await;
            if *requested {
                return Ok(());
            }
            *requested = true;
        }
        tracing::info!("Server shutdown requested");

        let sessions: Vec<Arc<Session>> =
            self.state.read().await.sessions.values().cloned().collect();
        for session in &sessions {
            session
                .notify(
                    methods::NOTIFICATION_CANCELLED,
                    Some(serde_json::json!({"reason": "Server is shutting down"})),
                )
                .await;
            session.begin_shutdown().await;
        }

        if let Err(e) = self.shutdown.shutdown().await {
            tracing::warn!(error = %e, "Shutdown grace period expired");
        }

        // Anything still alive goes down hard
        let stragglers: Vec<Arc<Session>> =
            self.state.read().await.sessions.values().cloned().collect();
        for session in stragglers {
            session.terminate().await;
        }
        Ok(())
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn security(&self) -> &Arc<SecurityPipeline> {
        &self.security
    }

    pub fn dlq(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    pub fn delivery(&self) -> &Arc<DeliveryQueue> {
        &self.delivery
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }
}

/// Builder wiring the server's collaborators with sensible defaults
pub struct McpServerBuilder {
    config: ServerConfig,
    transport: Option<Arc<dyn Transport>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    templates: Option<Arc<dyn TemplateRegistry>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    geo: Option<Arc<dyn GeoProvider>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    sampler: Option<Arc<dyn SamplingBackend>>,
}

impl McpServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            transport: None,
            catalog: None,
            templates: None,
            identity: None,
            geo: None,
            audit_sink: None,
            sampler: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRegistry>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_geo_provider(mut self, geo: Arc<dyn GeoProvider>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn SamplingBackend>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn build(self) -> McpResult<Arc<McpServer>> {
        self.config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| McpError::configuration("a transport is required"))?;
        let catalog = self
            .catalog
            .ok_or_else(|| McpError::configuration("a tool catalog is required"))?;
        let templates = self
            .templates
            .unwrap_or_else(|| Arc::new(crate::registry::InMemoryTemplateRegistry::new()));
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(StaticIdentityProvider::permissive()));
        let geo = self.geo.unwrap_or_else(|| Arc::new(AllowAllGeoProvider));
        let audit_sink = self
            .audit_sink
            .unwrap_or_else(|| Arc::new(MemoryAuditSink::new(self.config.audit.retention_days)));
        let sampler = self.sampler.unwrap_or_else(|| Arc::new(LocalSampler));

        let metrics = MetricsRegistry::new();
        let bus = Arc::new(EventBus::new());
        let security = Arc::new(SecurityPipeline::new(
            &self.config,
            identity,
            geo,
            audit_sink,
        ));
        let engine = Arc::new(WorkflowEngine::new(
            catalog.clone(),
            templates,
            self.config.workflow.clone(),
            metrics.clone(),
        ));
        let triggers = Arc::new(TriggerManager::new(bus.clone(), engine.clone()));
        let compositions = Arc::new(CompositionRegistry::new());
        let bridge = ToolBridge::new(catalog);
        let handler = Arc::new(McpRequestHandler::new(
            bridge,
            engine,
            triggers,
            security.clone(),
            compositions,
            sampler,
            metrics.clone(),
        ));

        let dlq = Arc::new(DeadLetterQueue::new(self.config.dlq.clone(), metrics.clone()));
        let delivery = Arc::new(DeliveryQueue::new(
            self.config.delivery.clone(),
            dlq.clone(),
            metrics.clone(),
        ));

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(McpServer {
            config: self.config,
            transport,
            handler,
            security,
            bus,
            metrics,
            clients: Arc::new(ClientRegistry::new()),
            dlq,
            delivery,
            state: RwLock::new(ServerState {
                sessions: HashMap::new(),
                connections: HashMap::new(),
                pumps: HashMap::new(),
            }),
            signals_tx,
            signals_rx: Mutex::new(Some(signals_rx)),
            shutdown: ShutdownCoordinator::new(Duration::from_secs(5)),
            shutdown_requested: RwLock::new(false),
            started_at: Utc::now(),
        }))
    }
}
