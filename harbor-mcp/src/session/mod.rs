//! Per-connection session: state machine, request correlation,
//! subscriptions and ordered outbound delivery
//!
//! A session is created by the server core after a successful initialize
//! handshake and lives until transport disconnect, server shutdown or an
//! explicit `shutdown` request. Handlers run concurrently; each admitted
//! request produces exactly one response (or one timeout error), and a
//! handler finishing after its timeout has its output dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::events::{topic_resource, EventBus};
use crate::protocol::{
    methods, ClientInfo, Incoming, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, LogLevel, Message, RequestId, ServerCapabilities,
};
use crate::transport::ConnectionInfo;
use crate::{McpError, McpResult};

/// Parse failures tolerated before the connection is closed
const MAX_PARSE_VIOLATIONS: u32 = 3;

/// Grace period for in-flight requests once shutdown starts
const FORCE_SHUTDOWN_AFTER: Duration = Duration::from_secs(5);

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    ShuttingDown,
    Terminated,
}

/// Signals a session raises toward the server core
#[derive(Debug, Clone)]
pub enum SessionSignal {
    /// The session finished terminating and can be dropped
    Terminated { session_id: String },
    /// The connection should be closed (protocol violations)
    CloseConnection { session_id: String, reason: String },
}

/// One tracked in-flight request
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
struct SubscriptionSet {
    /// resource uri → bus subscription id
    resources: HashMap<String, Uuid>,
    tools: HashSet<String>,
    prompts: HashSet<String>,
}

/// Dispatch target for admitted requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, session: Arc<Session>, request: JsonRpcRequest) -> McpResult<Value>;
}

/// Tunables a session needs from the server configuration
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
}

/// Snapshot returned by [`Session::info`]
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub client_name: String,
    pub client_version: String,
    pub state: SessionState,
    pub pending_requests: usize,
    pub resource_subscriptions: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

pub struct Session {
    /// Session id; one-to-one with the connection id
    pub id: String,
    client_info: ClientInfo,
    connect_info: ConnectionInfo,
    capabilities_advertised: ServerCapabilities,
    state: RwLock<SessionState>,
    pending: RwLock<HashMap<RequestId, PendingRequest>>,
    subscriptions: RwLock<SubscriptionSet>,
    outbound: mpsc::UnboundedSender<String>,
    notifications_tx: mpsc::UnboundedSender<JsonRpcNotification>,
    signals: mpsc::UnboundedSender<SessionSignal>,
    bus: Arc<EventBus>,
    handler: Arc<dyn RequestHandler>,
    limits: SessionLimits,
    parse_violations: AtomicU32,
    log_level: RwLock<LogLevel>,
    created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        client_info: ClientInfo,
        connect_info: ConnectionInfo,
        capabilities_advertised: ServerCapabilities,
        outbound: mpsc::UnboundedSender<String>,
        signals: mpsc::UnboundedSender<SessionSignal>,
        bus: Arc<EventBus>,
        handler: Arc<dyn RequestHandler>,
        limits: SessionLimits,
    ) -> Arc<Self> {
        let now = Utc::now();

        // Typed notifications funnel into the ordered outbound queue
        let (notifications_tx, mut notifications_rx) =
            mpsc::unbounded_channel::<JsonRpcNotification>();
        let pump_outbound = outbound.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications_rx.recv().await {
                match serde_json::to_string(&notification) {
                    Ok(encoded) => {
                        if pump_outbound.send(encoded).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to encode notification"),
                }
            }
        });

        Arc::new(Self {
            id,
            client_info,
            connect_info,
            capabilities_advertised,
            state: RwLock::new(SessionState::Initialized),
            pending: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(SubscriptionSet::default()),
            outbound,
            notifications_tx,
            signals,
            bus,
            handler,
            limits,
            parse_violations: AtomicU32::new(0),
            log_level: RwLock::new(LogLevel::Info),
            created_at: now,
            last_activity: RwLock::new(now),
        })
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    pub fn connect_info(&self) -> &ConnectionInfo {
        &self.connect_info
    }

    /// Sender for typed notifications (progress reporters and friends).
    pub fn notification_sender(&self) -> mpsc::UnboundedSender<JsonRpcNotification> {
        self.notifications_tx.clone()
    }

    pub fn advertised_capabilities(&self) -> &ServerCapabilities {
        &self.capabilities_advertised
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            client_name: self.client_info.name.clone(),
            client_version: self.client_info.version.clone(),
            state: *self.state.read().await,
            pending_requests: self.pending.read().await.len(),
            resource_subscriptions: self.subscriptions.read().await.resources.len(),
            created_at: self.created_at,
            last_activity: *self.last_activity.read().await,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn set_log_level(&self, level: LogLevel) {
        *self.log_level.write().await = level;
    }

    pub async fn log_level(&self) -> LogLevel {
        *self.log_level.read().await
    }

    /// Deliver one raw frame from the transport.
    pub async fn deliver(self: &Arc<Self>, raw: &str) {
        *self.last_activity.write().await = Utc::now();

        match Incoming::parse(raw) {
            Err(err) => self.on_parse_error(raw, err).await,
            Ok(Incoming::Single(Err(err))) => {
                // Well-formed JSON, invalid JSON-RPC shape
                let id = crate::protocol::jsonrpc::derive_id(raw);
                self.send_message(&Message::Error(JsonRpcErrorResponse::new(id, err.into())))
                    .await;
            }
            Ok(Incoming::Single(Ok(message))) => self.handle_message(message).await,
            Ok(Incoming::Batch(items)) => self.handle_batch(items).await,
        }
    }

    async fn handle_message(self: &Arc<Self>, message: Message) {
        match message {
            Message::Request(request) => match self.admit(&request).await {
                Ok(()) => {
                    let session = self.clone();
                    tokio::spawn(async move {
                        let response = session.run_request(request).await;
                        session.send_message(&response).await;
                        session.check_drained().await;
                    });
                }
                Err(response) => self.send_message(&response).await,
            },
            Message::Notification(notification) => self.handle_notification(notification).await,
            Message::Response(_) | Message::Error(_) => {
                // Server-initiated requests are not part of this surface
                tracing::debug!(session_id = %self.id, "Ignoring client-sent response");
            }
        }
    }

    /// Process a batch: requests run through the same admission and
    /// correlation machinery, the responses come back as one array in
    /// request order. Notifications inside a batch produce no slot.
    async fn handle_batch(self: &Arc<Self>, items: Vec<McpResult<Message>>) {
        use futures_util::future::BoxFuture;

        let mut slots: Vec<BoxFuture<'static, Message>> = Vec::new();
        for item in items {
            match item {
                Ok(Message::Request(request)) => match self.admit(&request).await {
                    Ok(()) => {
                        let session = self.clone();
                        slots.push(Box::pin(async move {
                            let response = session.run_request(request).await;
                            session.check_drained().await;
                            response
                        }));
                    }
                    Err(response) => slots.push(Box::pin(std::future::ready(response))),
                },
                Ok(Message::Notification(notification)) => {
                    self.handle_notification(notification).await;
                }
                Ok(_) => {
                    tracing::debug!(session_id = %self.id, "Ignoring response inside batch");
                }
                Err(err) => {
                    slots.push(Box::pin(std::future::ready(Message::Error(
                        JsonRpcErrorResponse::new(None, err.into()),
                    ))));
                }
            }
        }

        if slots.is_empty() {
            // A batch of notifications gets no reply
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            let responses = join_all(slots).await;
            match serde_json::to_string(&responses) {
                Ok(encoded) => {
                    let _ = session.outbound.send(encoded);
                }
                Err(e) => {
                    tracing::error!(session_id = %session.id, error = %e, "Failed to encode batch response")
                }
            }
        });
    }

    /// Admission control: state gate plus the concurrent-request cap.
    /// Rejections never enter the pending map.
    async fn admit(&self, request: &JsonRpcRequest) -> Result<(), Message> {
        let state = *self.state.read().await;
        if state != SessionState::Initialized {
            return Err(Message::Error(JsonRpcErrorResponse::new(
                Some(request.id.clone()),
                McpError::session("session is shutting down").into(),
            )));
        }

        let mut pending = self.pending.write().await;
        if pending.len() >= self.limits.max_concurrent_requests {
            return Err(Message::Error(JsonRpcErrorResponse::new(
                Some(request.id.clone()),
                McpError::internal(format!(
                    "concurrent request limit ({}) exceeded",
                    self.limits.max_concurrent_requests
                ))
                .into(),
            )));
        }
        if pending.contains_key(&request.id) {
            return Err(Message::Error(JsonRpcErrorResponse::new(
                Some(request.id.clone()),
                McpError::invalid_request("duplicate request id").into(),
            )));
        }

        pending.insert(
            request.id.clone(),
            PendingRequest {
                method: request.method.clone(),
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Run one admitted request to its single response.
    async fn run_request(self: &Arc<Self>, request: JsonRpcRequest) -> Message {
        let id = request.id.clone();
        let method = request.method.clone();

        let handler = self.handler.clone();
        let session = self.clone();
        let work = tokio::spawn(async move { handler.handle(session, request).await });

        let outcome = tokio::time::timeout(self.limits.request_timeout, work).await;
        self.pending.write().await.remove(&id);

        match outcome {
            Ok(Ok(Ok(result))) => Message::Response(JsonRpcResponse::new(id, result)),
            Ok(Ok(Err(err))) => {
                tracing::debug!(session_id = %self.id, method = %method, error = %err, "Request failed");
                Message::Error(JsonRpcErrorResponse::new(Some(id), err.into()))
            }
            Ok(Err(join_err)) => {
                tracing::error!(session_id = %self.id, method = %method, "Handler panicked: {}", join_err);
                Message::Error(JsonRpcErrorResponse::new(
                    Some(id),
                    McpError::internal("handler panicked").into(),
                ))
            }
            Err(_) => {
                // The handler task keeps running; with the pending entry
                // gone its eventual output is dropped.
                tracing::warn!(
                    session_id = %self.id,
                    method = %method,
                    timeout_ms = self.limits.request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                Message::Error(JsonRpcErrorResponse::new(
                    Some(id),
                    McpError::RequestTimeout {
                        timeout: self.limits.request_timeout,
                    }
                    .into(),
                ))
            }
        }
    }

    async fn handle_notification(self: &Arc<Self>, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::NOTIFICATION_CANCELLED => {
                let reason = notification
                    .params
                    .as_ref()
                    .and_then(|p| p.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("cancelled");
                tracing::debug!(session_id = %self.id, reason, "Client cancelled");
            }
            other => {
                tracing::debug!(session_id = %self.id, method = other, "Unhandled notification");
            }
        }
    }

    async fn on_parse_error(self: &Arc<Self>, raw: &str, err: McpError) {
        let violations = self.parse_violations.fetch_add(1, Ordering::SeqCst) + 1;

        // Respond when an id is derivable; otherwise no response
        let id = crate::protocol::jsonrpc::derive_id(raw);
        self.send_message(&Message::Error(JsonRpcErrorResponse::new(id, err.into())))
            .await;

        if violations >= MAX_PARSE_VIOLATIONS {
            tracing::warn!(session_id = %self.id, violations, "Closing connection after repeated parse errors");
            let _ = self.signals.send(SessionSignal::CloseConnection {
                session_id: self.id.clone(),
                reason: "repeated parse errors".to_string(),
            });
        }
    }

    /// Queue a server-initiated notification. Notifications are delivered
    /// to the transport in enqueue order.
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        let notification = JsonRpcNotification::new(method, params);
        match serde_json::to_string(&notification) {
            Ok(encoded) => {
                let _ = self.outbound.send(encoded);
            }
            Err(e) => tracing::error!(session_id = %self.id, error = %e, "Failed to encode notification"),
        }
    }

    async fn send_message(&self, message: &Message) {
        match message.encode() {
            Ok(encoded) => {
                let _ = self.outbound.send(encoded);
            }
            Err(e) => tracing::error!(session_id = %self.id, error = %e, "Failed to encode message"),
        }
    }

    /// Subscribe this session to change events for a resource URI.
    pub async fn subscribe_resource(self: &Arc<Self>, uri: &str) {
        let topic = topic_resource(uri);
        let (sub_id, mut rx) = self.bus.subscribe(&topic, &self.id).await;
        self.subscriptions
            .write()
            .await
            .resources
            .insert(uri.to_string(), sub_id);

        let session = self.clone();
        let uri = uri.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let change = event
                    .payload
                    .get("change")
                    .and_then(Value::as_str)
                    .unwrap_or("updated");
                let method = if change == "deleted" {
                    methods::NOTIFICATION_RESOURCES_DELETED
                } else {
                    methods::NOTIFICATION_RESOURCES_UPDATED
                };
                session
                    .notify(
                        method,
                        Some(serde_json::json!({
                            "uri": uri,
                            "timestamp": event.timestamp.to_rfc3339(),
                        })),
                    )
                    .await;
            }
        });
    }

    /// Drop this session's subscription for a resource URI.
    pub async fn unsubscribe_resource(&self, uri: &str) -> bool {
        let sub_id = self.subscriptions.write().await.resources.remove(uri);
        match sub_id {
            Some(sub_id) => {
                self.bus.unsubscribe(&topic_resource(uri), sub_id).await;
                true
            }
            None => false,
        }
    }

    /// Whether this session subscribed to a resource URI.
    pub async fn is_subscribed_to(&self, uri: &str) -> bool {
        self.subscriptions.read().await.resources.contains_key(uri)
    }

    /// Begin graceful shutdown: stop admitting, drain in-flight work,
    /// force-terminate after the grace period.
    pub async fn begin_shutdown(self: &Arc<Self>) {
        {
            let mut state = self.state.write().await;
            if *state != SessionState::Initialized {
                return;
            }
            *state = SessionState::ShuttingDown;
        }
        tracing::info!(session_id = %self.id, "Session shutting down");

        if self.pending.read().await.is_empty() {
            self.terminate().await;
            return;
        }

        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FORCE_SHUTDOWN_AFTER).await;
            if session.state().await != SessionState::Terminated {
                tracing::warn!(session_id = %session.id, "Force-terminating session after grace period");
                session.terminate().await;
            }
        });
    }

    async fn check_drained(self: &Arc<Self>) {
        if *self.state.read().await == SessionState::ShuttingDown
            && self.pending.read().await.is_empty()
        {
            self.terminate().await;
        }
    }

    /// Terminate: release subscriptions and notify the server core.
    /// Idempotent.
    pub async fn terminate(self: &Arc<Self>) {
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Terminated;
        }

        self.bus.release_owner(&self.id).await;
        {
            let mut subs = self.subscriptions.write().await;
            subs.resources.clear();
            subs.tools.clear();
            subs.prompts.clear();
        }

        tracing::info!(session_id = %self.id, "Session terminated");
        let _ = self.signals.send(SessionSignal::Terminated {
            session_id: self.id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubHandler;

    #[async_trait]
    impl RequestHandler for StubHandler {
        async fn handle(
            &self,
            _session: Arc<Session>,
            request: JsonRpcRequest,
        ) -> McpResult<Value> {
            match request.method.as_str() {
                "echo" => Ok(request.params.unwrap_or(Value::Null)),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(json!("late"))
                }
                "fail" => Err(McpError::invalid_params("fail", "always fails")),
                other => Err(McpError::method_not_found(other)),
            }
        }
    }

    struct Harness {
        session: Arc<Session>,
        outbound: mpsc::UnboundedReceiver<String>,
        signals: mpsc::UnboundedReceiver<SessionSignal>,
        bus: Arc<EventBus>,
    }

    fn harness_with_limits(limits: SessionLimits) -> Harness {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let bus = Arc::new(EventBus::new());
        let session = Session::new(
            "conn-1".to_string(),
            ClientInfo {
                name: "test".into(),
                version: "0.0".into(),
                metadata: Default::default(),
            },
            ConnectionInfo {
                connection_id: "conn-1".into(),
                peer_address: "127.0.0.1".into(),
                user_agent: None,
                transport: "test",
            },
            ServerCapabilities::default(),
            outbound_tx,
            signal_tx,
            bus.clone(),
            Arc::new(StubHandler),
            limits,
        );
        Harness {
            session,
            outbound,
            signals,
            bus,
        }
    }

    fn harness() -> Harness {
        harness_with_limits(SessionLimits {
            request_timeout: Duration::from_millis(500),
            max_concurrent_requests: 50,
        })
    }

    async fn recv_json(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed");
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_request_gets_exactly_one_response_with_matching_id() {
        let mut h = harness();
        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":42,"method":"echo","params":{"x":1}}"#)
            .await;

        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["id"], 42);
        assert_eq!(response["result"]["x"], 1);
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let mut h = harness();
        h.session
            .deliver(r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"reason":"x"}}"#)
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let mut h = harness();
        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":1,"method":"fail"}"#)
            .await;

        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let mut h = harness();
        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":2,"method":"no/such"}"#)
            .await;

        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_produces_single_error_and_drops_late_output() {
        let mut h = harness();
        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":9,"method":"slow"}"#)
            .await;

        // Past the 500ms request timeout, far before the handler finishes
        tokio::time::advance(Duration::from_secs(1)).await;
        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["id"], 9);
        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(h.session.pending_count().await, 0);

        // Let the slow handler complete; nothing further is emitted
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_request_limit() {
        let mut h = harness_with_limits(SessionLimits {
            request_timeout: Duration::from_secs(120),
            max_concurrent_requests: 2,
        });

        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":"a","method":"slow"}"#)
            .await;
        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":"b","method":"slow"}"#)
            .await;
        // Give the spawned handlers a beat to register
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.pending_count().await, 2);

        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":"c","method":"echo"}"#)
            .await;

        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["id"], "c");
        assert_eq!(response["error"]["code"], -32603);
        // The rejected request never entered the pending map
        assert_eq!(h.session.pending_count().await, 2);
    }

    #[tokio::test]
    async fn test_batch_responses_in_request_order() {
        let mut h = harness();
        h.session
            .deliver(
                r#"[{"jsonrpc":"2.0","id":1,"method":"echo","params":{"n":1}},
                    {"jsonrpc":"2.0","method":"notifications/cancelled","params":{"reason":"x"}},
                    {"jsonrpc":"2.0","id":2,"method":"fail"}]"#,
            )
            .await;

        let responses = recv_json(&mut h.outbound).await;
        let responses = responses.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["n"], 1);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_repeated_parse_errors_close_connection() {
        let mut h = harness();
        for _ in 0..3 {
            h.session.deliver("{garbage").await;
        }

        let signal = tokio::time::timeout(Duration::from_secs(1), h.signals.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(signal, SessionSignal::CloseConnection { .. }));
    }

    #[tokio::test]
    async fn test_subscriptions_released_on_terminate() {
        let mut h = harness();
        h.session.subscribe_resource("workspace://doc/1").await;
        assert!(h.session.is_subscribed_to("workspace://doc/1").await);
        assert_eq!(h.bus.subscription_count().await, 1);

        h.session.terminate().await;
        assert_eq!(h.bus.subscription_count().await, 0);
        assert_eq!(h.session.state().await, SessionState::Terminated);

        let signal = h.signals.recv().await.unwrap();
        assert!(matches!(signal, SessionSignal::Terminated { .. }));
    }

    #[tokio::test]
    async fn test_resource_update_notification_flows_to_session() {
        let mut h = harness();
        h.session.subscribe_resource("workspace://doc/1").await;

        h.bus
            .publish(
                &topic_resource("workspace://doc/1"),
                json!({"change": "updated"}),
            )
            .await;

        let notification = recv_json(&mut h.outbound).await;
        assert_eq!(notification["method"], "notifications/resources/updated");
        assert_eq!(notification["params"]["uri"], "workspace://doc/1");
        assert!(notification.get("id").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests_and_terminates_when_idle() {
        let mut h = harness();
        h.session.begin_shutdown().await;
        assert_eq!(h.session.state().await, SessionState::Terminated);

        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":5,"method":"echo"}"#)
            .await;
        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_requests() {
        let mut h = harness_with_limits(SessionLimits {
            request_timeout: Duration::from_secs(5),
            max_concurrent_requests: 10,
        });

        h.session
            .deliver(r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":{"ok":true}}"#)
            .await;
        h.session.begin_shutdown().await;

        // The in-flight echo still completes
        let response = recv_json(&mut h.outbound).await;
        assert_eq!(response["id"], 1);
    }
}
