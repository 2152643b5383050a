//! Tool catalog contract: the internal surface the bridge translates
//! MCP calls onto

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::protocol::{JsonRpcNotification, Prompt, PromptsGetResult};
use crate::{McpError, McpResult};

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn json_schema_name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// Value constraints carried by a parameter declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Closed set of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

/// One declared tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub param_type: ParamType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default)]
    pub constraints: ParamConstraints,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            constraints: ParamConstraints::default(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_constraints(mut self, constraints: ParamConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Execution hints declared by a tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHints {
    #[serde(default)]
    pub supports_async: bool,

    #[serde(default)]
    pub supports_streaming: bool,

    #[serde(default)]
    pub supports_cancellation: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_constraints: Option<Value>,
}

/// Internal declaration of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,

    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub execution: ExecutionHints,
}

/// Output produced by a tool execution
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain text
    Text(String),
    /// Markdown, delivered with `text/markdown`
    Markdown(String),
    /// Structured data, JSON-encoded with `application/json`
    Json(Value),
}

/// Progress callback handed to executing tools
#[derive(Clone)]
pub struct ProgressReporter {
    tool_name: String,
    request_id: String,
    tx: mpsc::UnboundedSender<JsonRpcNotification>,
}

impl ProgressReporter {
    pub fn new(
        tool_name: impl Into<String>,
        request_id: impl Into<String>,
        tx: mpsc::UnboundedSender<JsonRpcNotification>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            request_id: request_id.into(),
            tx,
        }
    }

    /// Publish a progress update into the session's notification stream.
    pub fn report(&self, progress: f32, message: Option<String>) {
        let body = crate::protocol::ToolProgressNotification {
            tool_name: self.tool_name.clone(),
            request_id: self.request_id.clone(),
            progress: progress.clamp(0.0, 1.0),
            message,
        };
        let notification = JsonRpcNotification::new(
            crate::protocol::methods::NOTIFICATION_TOOL_PROGRESS,
            serde_json::to_value(body).ok(),
        );
        // A closed session just drops further progress
        let _ = self.tx.send(notification);
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("tool_name", &self.tool_name)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// Context passed to a tool execution
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// MCP session on whose behalf the tool runs
    pub mcp_session_id: String,

    /// Progress reporter, present when the caller enabled progress
    pub progress: Option<ProgressReporter>,

    /// Cooperative cancellation signal; `true` means cancel
    pub cancel: watch::Receiver<bool>,

    /// Workflow shared context, immutable from the step's perspective
    pub shared_context: Option<std::sync::Arc<std::collections::HashMap<String, Value>>>,
}

impl ToolInvocation {
    pub fn new(mcp_session_id: impl Into<String>) -> Self {
        let (_, cancel) = cancel_pair();
        Self {
            mcp_session_id: mcp_session_id.into(),
            progress: None,
            cancel,
            shared_context: None,
        }
    }

    pub fn with_shared_context(
        mut self,
        context: std::sync::Arc<std::collections::HashMap<String, Value>>,
    ) -> Self {
        self.shared_context = Some(context);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// A (sender, receiver) pair for cooperative cancellation
pub fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resource listed by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource payload returned by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceData {
    pub uri: String,
    pub text: String,
    pub mime_type: Option<String>,
}

/// Parsed `<scheme>://<type>/<id>` resource URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    pub scheme: String,
    pub kind: String,
    pub id: String,
    pub raw: String,
}

impl ResourceUri {
    /// Parse and validate a resource URI. Anything that does not fit the
    /// `<scheme>://<type>/<id>` shape is reported as not-found.
    pub fn parse(raw: &str) -> McpResult<ResourceUri> {
        let url =
            Url::parse(raw).map_err(|_| McpError::resource_not_found(raw.to_string()))?;
        let scheme = url.scheme().to_string();
        let kind = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| McpError::resource_not_found(raw.to_string()))?
            .to_string();
        let id = url.path().trim_start_matches('/').to_string();
        if id.is_empty() {
            return Err(McpError::resource_not_found(raw.to_string()));
        }
        Ok(ResourceUri {
            scheme,
            kind,
            id,
            raw: raw.to_string(),
        })
    }
}

/// The internal tool/resource/prompt catalog the bridge fronts
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Enumerate available tools.
    async fn list(&self) -> Vec<ToolDescriptor>;

    /// Look up one tool.
    async fn get(&self, name: &str) -> Option<ToolDescriptor>;

    /// Execute a tool with already-coerced parameters.
    async fn execute(
        &self,
        name: &str,
        params: Value,
        invocation: ToolInvocation,
    ) -> McpResult<ToolOutput>;

    /// Enumerate readable resources.
    async fn list_resources(&self) -> Vec<ResourceDescriptor>;

    /// Read one resource.
    async fn read_resource(&self, uri: &ResourceUri) -> McpResult<ResourceData>;

    /// Enumerate prompts.
    async fn list_prompts(&self) -> Vec<Prompt>;

    /// Render one prompt.
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<&serde_json::Map<String, Value>>,
    ) -> McpResult<PromptsGetResult>;
}
