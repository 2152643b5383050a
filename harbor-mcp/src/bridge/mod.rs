//! Tool bridge: translates MCP `tools/*`, `resources/*` and `prompts/*`
//! calls into catalog operations and back

pub mod catalog;
pub mod sanitize;
pub mod schema;

pub use catalog::{
    cancel_pair, ExecutionHints, ParamConstraints, ParamType, ParameterDescriptor,
    ProgressReporter, ResourceData, ResourceDescriptor, ResourceUri, ToolCatalog, ToolDescriptor,
    ToolInvocation, ToolOutput,
};
pub use sanitize::sanitize_error_message;
pub use schema::{coerce_arguments, parameters_to_schema};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::protocol::{
    JsonRpcNotification, PromptsGetParams, PromptsGetResult, PromptsListResult, Resource,
    ResourceContent, ResourcesListResult, ResourcesReadResult, Tool, ToolCapabilityDescriptor,
    ToolContent, ToolsCallParams, ToolsCallResult, ToolsListResult,
};
use crate::{McpError, McpResult};

/// Adapter between the MCP wire surface and the internal catalog
pub struct ToolBridge {
    catalog: Arc<dyn ToolCatalog>,
}

impl ToolBridge {
    pub fn new(catalog: Arc<dyn ToolCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> Arc<dyn ToolCatalog> {
        self.catalog.clone()
    }

    /// Handle tools/list.
    pub async fn list_tools(&self) -> ToolsListResult {
        let tools = self
            .catalog
            .list()
            .await
            .iter()
            .map(descriptor_to_wire)
            .collect();
        ToolsListResult {
            tools,
            next_cursor: None,
        }
    }

    /// Handle tools/call.
    pub async fn call_tool(
        &self,
        params: ToolsCallParams,
        session_id: &str,
        request_id: &str,
        notifications: Option<mpsc::UnboundedSender<JsonRpcNotification>>,
    ) -> McpResult<ToolsCallResult> {
        let descriptor = self
            .catalog
            .get(&params.name)
            .await
            .ok_or_else(|| McpError::ToolNotFound {
                tool_name: params.name.clone(),
            })?;

        let coerced = coerce_arguments(&params.name, &descriptor.parameters, params.arguments)?;

        let mut invocation = ToolInvocation::new(session_id);
        if params.report_progress {
            if let Some(tx) = notifications {
                invocation = invocation
                    .with_progress(ProgressReporter::new(&params.name, request_id, tx));
            }
        }

        let started = std::time::Instant::now();
        let output = self
            .catalog
            .execute(&params.name, coerced, invocation)
            .await
            .map_err(|e| translate_execution_error(&params.name, e))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut metadata = HashMap::new();
        metadata.insert("tool".to_string(), Value::String(params.name.clone()));
        metadata.insert("executionTime".to_string(), Value::from(elapsed_ms));

        Ok(ToolsCallResult {
            content: vec![format_output(output)],
            is_error: false,
            metadata,
        })
    }

    /// Handle resources/list.
    pub async fn list_resources(&self) -> ResourcesListResult {
        let resources = self
            .catalog
            .list_resources()
            .await
            .into_iter()
            .map(|r| Resource {
                uri: r.uri,
                name: r.name,
                description: r.description,
                mime_type: r.mime_type,
            })
            .collect();
        ResourcesListResult {
            resources,
            next_cursor: None,
        }
    }

    /// Handle resources/read.
    pub async fn read_resource(&self, uri: &str) -> McpResult<ResourcesReadResult> {
        let parsed = ResourceUri::parse(uri)?;
        let data = self.catalog.read_resource(&parsed).await?;
        Ok(ResourcesReadResult {
            contents: vec![ResourceContent::Text {
                uri: data.uri,
                text: data.text,
                mime_type: data.mime_type,
            }],
        })
    }

    /// Handle prompts/list.
    pub async fn list_prompts(&self) -> PromptsListResult {
        PromptsListResult {
            prompts: self.catalog.list_prompts().await,
            next_cursor: None,
        }
    }

    /// Handle prompts/get.
    pub async fn get_prompt(&self, params: PromptsGetParams) -> McpResult<PromptsGetResult> {
        let arguments = params.arguments.map(|args| args.into_iter().collect());
        self.catalog
            .get_prompt(&params.name, arguments.as_ref())
            .await
    }
}

/// Map a tool descriptor onto the wire shape.
fn descriptor_to_wire(descriptor: &ToolDescriptor) -> Tool {
    let mut metadata = HashMap::new();
    if !descriptor.category.is_empty() {
        metadata.insert(
            "category".to_string(),
            Value::String(descriptor.category.clone()),
        );
    }
    if !descriptor.version.is_empty() {
        metadata.insert(
            "version".to_string(),
            Value::String(descriptor.version.clone()),
        );
    }

    Tool {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        input_schema: parameters_to_schema(&descriptor.parameters),
        capabilities: Some(ToolCapabilityDescriptor {
            supports_async: descriptor.execution.supports_async,
            supports_streaming: descriptor.execution.supports_streaming,
            supports_cancellation: descriptor.execution.supports_cancellation,
            max_execution_time: descriptor
                .execution
                .max_execution_time
                .map(|d| d.as_millis() as u64),
            resource_limits: descriptor.execution.resource_limits.clone(),
            security_constraints: descriptor.execution.security_constraints.clone(),
        }),
        metadata,
    }
}

/// Format a tool's output as MCP content.
fn format_output(output: ToolOutput) -> ToolContent {
    match output {
        ToolOutput::Text(text) => ToolContent::Text {
            text,
            mime_type: None,
        },
        ToolOutput::Markdown(text) => ToolContent::Text {
            text,
            mime_type: Some("text/markdown".to_string()),
        },
        ToolOutput::Json(value) => ToolContent::Text {
            text: value.to_string(),
            mime_type: Some("application/json".to_string()),
        },
    }
}

/// Sanitize and classify a catalog execution error. Parameter validation
/// and authorization keep their kinds; everything else becomes a
/// tool-execution failure with a scrubbed message.
fn translate_execution_error(tool_name: &str, error: McpError) -> McpError {
    match error {
        McpError::InvalidParams { method, details } => McpError::InvalidParams {
            method,
            details: sanitize_error_message(&details),
        },
        McpError::AuthorizationDenied { reason } => McpError::AuthorizationDenied {
            reason: sanitize_error_message(&reason),
        },
        McpError::RequestTimeout { timeout } => McpError::RequestTimeout { timeout },
        McpError::Cancelled { reason } => McpError::Cancelled {
            reason: sanitize_error_message(&reason),
        },
        McpError::ToolExecutionFailed { tool_name, reason } => McpError::ToolExecutionFailed {
            tool_name,
            reason: sanitize_error_message(&reason),
        },
        other => McpError::ToolExecutionFailed {
            tool_name: tool_name.to_string(),
            reason: sanitize_error_message(&other.to_string()),
        },
    }
}
