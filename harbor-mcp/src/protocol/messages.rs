//! MCP-specific message bodies and protocol definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::capabilities::{ClientCapabilities, ServerCapabilities};

// === Initialize Protocol ===

/// Parameters for the initialize method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version offered by the client
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Client capabilities
    #[serde(default)]
    pub capabilities: ClientCapabilities,

    /// Client information
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

/// Result of the initialize method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version the server speaks
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Server capabilities
    pub capabilities: ServerCapabilities,

    /// Server information
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Client information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,

    /// Additional client metadata
    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

/// Server information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,

    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

// === Tool Protocol ===

/// Parameters for tools/list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of tools/list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<Tool>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Wire-level tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,

    /// JSON Schema for the tool's parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,

    /// Execution capability descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ToolCapabilityDescriptor>,

    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

/// What a tool supports at execution time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCapabilityDescriptor {
    #[serde(rename = "supportsAsync")]
    pub supports_async: bool,

    #[serde(rename = "supportsStreaming")]
    pub supports_streaming: bool,

    #[serde(rename = "supportsCancellation")]
    pub supports_cancellation: bool,

    /// Maximum execution time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxExecutionTime")]
    pub max_execution_time: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "resourceLimits")]
    pub resource_limits: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "securityConstraints")]
    pub security_constraints: Option<Value>,
}

/// Parameters for tools/call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,

    /// Whether the caller wants progress notifications
    #[serde(default, rename = "reportProgress")]
    pub report_progress: bool,
}

/// Result of tools/call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsCallResult {
    pub content: Vec<ToolContent>,

    #[serde(default, rename = "isError")]
    pub is_error: bool,

    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

/// Content item returned by tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
    },

    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    #[serde(rename = "resource")]
    Resource {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

// === Resource Protocol ===

/// Parameters for resources/list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of resources/list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesListResult {
    pub resources: Vec<Resource>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Resource definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// Parameters for resources/read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    pub uri: String,
}

/// Result of resources/read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesReadResult {
    pub contents: Vec<ResourceContent>,
}

/// Resource content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResourceContent {
    #[serde(rename = "text")]
    Text {
        uri: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
    },

    #[serde(rename = "blob")]
    Blob {
        uri: String,
        blob: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Parameters for resources/subscribe and resources/unsubscribe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesSubscribeParams {
    pub uri: String,
}

// === Prompt Protocol ===

/// Parameters for prompts/list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptsListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of prompts/list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptsListResult {
    pub prompts: Vec<Prompt>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// Prompt definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// Argument accepted by a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,
}

/// Parameters for prompts/get
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptsGetParams {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, Value>>,
}

/// Result of prompts/get
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptsGetResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub messages: Vec<PromptMessage>,
}

/// A rendered prompt message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: PromptContent,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Prompt message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PromptContent {
    #[serde(rename = "text")]
    Text { text: String },
}

// === Logging Protocol ===

/// Parameters for logging/setLevel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSetLevelParams {
    pub level: LogLevel,
}

/// MCP log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

// === Sampling Protocol ===

/// Parameters for sampling/createMessage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub messages: Vec<SamplingMessage>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "systemPrompt")]
    pub system_prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "maxTokens")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "stopSequences")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(flatten)]
    pub metadata: HashMap<String, Value>,
}

/// A sampling conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Result of sampling/createMessage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingResult {
    pub role: MessageRole,
    pub content: String,
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none", rename = "stopReason")]
    pub stop_reason: Option<String>,
}

// === Workflow Extension ===

/// Parameters for workflows/create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowsCreateParams {
    pub name: String,

    /// Declarative workflow spec, decoded by the workflow engine
    pub spec: Value,
}

/// Parameters for workflows/execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowsExecuteParams {
    /// Inline spec, or omitted when `name` references a stored composition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<Value>,

    /// Name of a stored composition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Initial shared context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, Value>>,

    /// Whether to stream step events
    #[serde(default)]
    pub streaming: bool,

    /// Workflow-level timeout override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none", rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

/// Result of workflows/templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplatesResult {
    pub templates: Vec<WorkflowTemplateInfo>,
}

/// Template summary in workflows/templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplateInfo {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Placeholder variables the template expects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
}

// === Notifications ===

/// Body of notifications/cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledNotification {
    pub reason: String,
}

/// Body of notifications/tool/progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProgressNotification {
    #[serde(rename = "toolName")]
    pub tool_name: String,

    #[serde(rename = "requestId")]
    pub request_id: String,

    /// Progress value (0.0 to 1.0)
    pub progress: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of notifications/resources/updated and .../deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceChangedNotification {
    pub uri: String,
    pub timestamp: String,
}

/// Method names of the full surface, bit-exact
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const SHUTDOWN: &str = "shutdown";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    pub const WORKFLOWS_CREATE: &str = "workflows/create";
    pub const WORKFLOWS_EXECUTE: &str = "workflows/execute";
    pub const WORKFLOWS_TEMPLATES: &str = "workflows/templates";
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

    pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
    pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const NOTIFICATION_TOOL_PROGRESS: &str = "notifications/tool/progress";
    pub const NOTIFICATION_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const NOTIFICATION_RESOURCES_UPDATED: &str = "notifications/resources/updated";
    pub const NOTIFICATION_RESOURCES_DELETED: &str = "notifications/resources/deleted";
    pub const NOTIFICATION_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
}
