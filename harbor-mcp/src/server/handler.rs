//! Request handler: dispatches session requests through the security
//! pipeline into the bridge and workflow engine

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::ToolBridge;
use crate::metrics::{names, MetricsRegistry};
use crate::protocol::{
    methods, JsonRpcRequest, LoggingSetLevelParams, MessageRole, PromptsGetParams,
    ResourcesReadParams, ResourcesSubscribeParams, SamplingParams, SamplingResult,
    ToolsCallParams, WorkflowTemplateInfo, WorkflowTemplatesResult, WorkflowsCreateParams,
    WorkflowsExecuteParams,
};
use crate::registry::CompositionRegistry;
use crate::security::{AccessRequest, Credential, SecurityPipeline};
use crate::session::{RequestHandler, Session};
use crate::workflow::{ExecutionOptions, TriggerManager, WorkflowEngine, WorkflowSpec};
use crate::{McpError, McpResult};

/// Backend for sampling/createMessage
#[async_trait]
pub trait SamplingBackend: Send + Sync {
    async fn create_message(&self, params: SamplingParams) -> McpResult<SamplingResult>;
}

/// Reference sampling backend: deterministic local completion used when
/// no model integration is wired in.
pub struct LocalSampler;

#[async_trait]
impl SamplingBackend for LocalSampler {
    async fn create_message(&self, params: SamplingParams) -> McpResult<SamplingResult> {
        let last_user = params
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(SamplingResult {
            role: MessageRole::Assistant,
            content: format!("[local] {}", last_user),
            model: "harbor-local".to_string(),
            stop_reason: Some("endTurn".to_string()),
        })
    }
}

/// The session-facing dispatcher
pub struct McpRequestHandler {
    bridge: ToolBridge,
    engine: Arc<WorkflowEngine>,
    triggers: Arc<TriggerManager>,
    security: Arc<SecurityPipeline>,
    compositions: Arc<CompositionRegistry>,
    sampler: Arc<dyn SamplingBackend>,
    metrics: MetricsRegistry,
}

impl McpRequestHandler {
    pub fn new(
        bridge: ToolBridge,
        engine: Arc<WorkflowEngine>,
        triggers: Arc<TriggerManager>,
        security: Arc<SecurityPipeline>,
        compositions: Arc<CompositionRegistry>,
        sampler: Arc<dyn SamplingBackend>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            bridge,
            engine,
            triggers,
            security,
            compositions,
            sampler,
            metrics,
        }
    }

    async fn dispatch(&self, session: Arc<Session>, request: JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            methods::PING => Ok(json!({})),

            methods::INITIALIZE => Err(McpError::invalid_request("session already initialized")),

            methods::SHUTDOWN => {
                session.begin_shutdown().await;
                Ok(Value::Null)
            }

            _ => self.dispatch_secured(session, request).await,
        }
    }

    async fn dispatch_secured(
        &self,
        session: Arc<Session>,
        request: JsonRpcRequest,
    ) -> McpResult<Value> {
        let method = request.method.clone();
        let params = request.params.clone().unwrap_or(Value::Null);

        let resource_uri = match method.as_str() {
            methods::RESOURCES_READ | methods::RESOURCES_SUBSCRIBE | methods::RESOURCES_UNSUBSCRIBE => {
                params.get("uri").and_then(Value::as_str).map(str::to_string)
            }
            _ => None,
        };

        let access = AccessRequest {
            client_id: session.id.clone(),
            ip_address: session.connect_info().peer_address.clone(),
            user_agent: session.connect_info().user_agent.clone(),
            operation: method.clone(),
            resource_uri,
            credential: Credential::from_params(&params),
            params: params.clone(),
        };
        let security_ctx = self.security.authorize_request(&access).await?;
        tracing::debug!(
            session_id = %session.id,
            method = %method,
            user_id = %security_ctx.user_id,
            "Request admitted"
        );

        match method.as_str() {
            methods::TOOLS_LIST => {
                let result = self.bridge.list_tools().await;
                Ok(serde_json::to_value(result)?)
            }

            methods::TOOLS_CALL => {
                let call: ToolsCallParams = decode(&method, request.params)?;
                let result = self
                    .bridge
                    .call_tool(
                        call,
                        &session.id,
                        &request.id.to_string(),
                        Some(session.notification_sender()),
                    )
                    .await?;
                Ok(serde_json::to_value(result)?)
            }

            methods::RESOURCES_LIST => {
                let result = self.bridge.list_resources().await;
                Ok(serde_json::to_value(result)?)
            }

            methods::RESOURCES_READ => {
                let read: ResourcesReadParams = decode(&method, request.params)?;
                let result = self.bridge.read_resource(&read.uri).await?;
                Ok(serde_json::to_value(result)?)
            }

            methods::RESOURCES_SUBSCRIBE => {
                let subscribe: ResourcesSubscribeParams = decode(&method, request.params)?;
                // URI shape is validated up front so bad subscriptions
                // fail loudly instead of never firing
                crate::bridge::ResourceUri::parse(&subscribe.uri)?;
                session.subscribe_resource(&subscribe.uri).await;
                Ok(json!({}))
            }

            methods::RESOURCES_UNSUBSCRIBE => {
                let unsubscribe: ResourcesSubscribeParams = decode(&method, request.params)?;
                session.unsubscribe_resource(&unsubscribe.uri).await;
                Ok(json!({}))
            }

            methods::PROMPTS_LIST => {
                let result = self.bridge.list_prompts().await;
                Ok(serde_json::to_value(result)?)
            }

            methods::PROMPTS_GET => {
                let get: PromptsGetParams = decode(&method, request.params)?;
                let result = self.bridge.get_prompt(get).await?;
                Ok(serde_json::to_value(result)?)
            }

            methods::LOGGING_SET_LEVEL => {
                let set: LoggingSetLevelParams = decode(&method, request.params)?;
                session.set_log_level(set.level).await;
                Ok(json!({}))
            }

            methods::WORKFLOWS_CREATE => {
                let create: WorkflowsCreateParams = decode(&method, request.params)?;
                let spec = WorkflowSpec::from_value(create.spec.clone())?;
                // Reactive compositions validate their base; everything
                // else compiles outright
                match &spec {
                    WorkflowSpec::Reactive { base, .. } => {
                        self.engine.compile_only((**base).clone()).await?;
                    }
                    _ => {
                        self.engine.compile_only(spec.clone()).await?;
                    }
                }
                self.compositions.store(&create.name, create.spec).await;
                Ok(json!({"name": create.name}))
            }

            methods::WORKFLOWS_EXECUTE => {
                let execute: WorkflowsExecuteParams = decode(&method, request.params)?;
                self.execute_workflow(session, execute).await
            }

            methods::WORKFLOWS_TEMPLATES => {
                let templates = self.engine.templates().list().await;
                let result = WorkflowTemplatesResult {
                    templates: templates
                        .into_iter()
                        .map(|t| WorkflowTemplateInfo {
                            name: t.name,
                            description: t.description,
                            variables: t.variables,
                        })
                        .collect(),
                };
                Ok(serde_json::to_value(result)?)
            }

            methods::SAMPLING_CREATE_MESSAGE => {
                let sampling: SamplingParams = decode(&method, request.params)?;
                let result = self.sampler.create_message(sampling).await?;
                Ok(serde_json::to_value(result)?)
            }

            other => Err(McpError::method_not_found(other)),
        }
    }

    async fn execute_workflow(
        &self,
        session: Arc<Session>,
        params: WorkflowsExecuteParams,
    ) -> McpResult<Value> {
        let spec_value = match (params.spec, &params.name) {
            (Some(spec), _) => spec,
            (None, Some(name)) => self.compositions.get(name).await.ok_or_else(|| {
                McpError::invalid_params(
                    methods::WORKFLOWS_EXECUTE,
                    format!("unknown composition: {}", name),
                )
            })?,
            (None, None) => {
                return Err(McpError::invalid_params(
                    methods::WORKFLOWS_EXECUTE,
                    "either spec or name is required",
                ))
            }
        };
        let spec = WorkflowSpec::from_value(spec_value)?;

        // Reactive workflows register their triggers and return
        if let WorkflowSpec::Reactive { base, triggers } = spec {
            let registered = self
                .triggers
                .register(*base, triggers, &session.id)
                .await?;
            return Ok(json!({"triggersRegistered": registered.len()}));
        }

        let options = ExecutionOptions {
            context: params.context.unwrap_or_default(),
            timeout: params.timeout_ms.map(Duration::from_millis),
            streaming: params.streaming,
            session_id: session.id.clone(),
        };

        let mut execution = self.engine.execute(spec, options).await?;
        let workflow_id = execution.id.clone();

        if let Some(mut events) = execution.events.take() {
            let session = session.clone();
            let id = workflow_id.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let mut payload = event.to_value();
                    if let Some(map) = payload.as_object_mut() {
                        map.insert("workflowId".to_string(), Value::String(id.clone()));
                    }
                    session
                        .notify("notifications/workflow/event", Some(payload))
                        .await;
                }
            });
        }

        let result = execution.result().await?;
        Ok(json!({"workflowId": workflow_id, "result": result}))
    }
}

#[async_trait]
impl RequestHandler for McpRequestHandler {
    async fn handle(&self, session: Arc<Session>, request: JsonRpcRequest) -> McpResult<Value> {
        self.metrics.incr(names::REQUESTS_TOTAL).await;
        let result = self.dispatch(session, request).await;
        if result.is_err() {
            self.metrics.incr(names::REQUESTS_FAILED).await;
        }
        result
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: Option<Value>) -> McpResult<T> {
    let params = params.ok_or_else(|| McpError::invalid_params(method, "missing parameters"))?;
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(method, e.to_string()))
}
