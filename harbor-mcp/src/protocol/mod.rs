//! MCP protocol implementation: JSON-RPC 2.0 framing plus the MCP
//! message surface

pub mod capabilities;
pub mod jsonrpc;
pub mod messages;

pub use capabilities::{
    CapabilityOverrides, ClientCapabilities, PromptsCapability, ResourcesCapability,
    ServerCapabilities, ToolsCapability,
};
pub use jsonrpc::{
    error_codes, Incoming, JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, Message, RequestId, JSONRPC_VERSION,
};
pub use messages::{
    methods, CancelledNotification, ClientInfo, InitializeParams, InitializeResult, LogLevel,
    LoggingSetLevelParams, MessageRole, Prompt, PromptArgument, PromptContent, PromptMessage,
    PromptsGetParams, PromptsGetResult, PromptsListResult, Resource,
    ResourceChangedNotification, ResourceContent, ResourcesListResult, ResourcesReadParams,
    ResourcesReadResult, ResourcesSubscribeParams, SamplingMessage, SamplingParams,
    SamplingResult, ServerInfo, Tool, ToolCapabilityDescriptor, ToolContent,
    ToolProgressNotification, ToolsCallParams, ToolsCallResult, ToolsListResult,
    WorkflowTemplateInfo, WorkflowTemplatesResult, WorkflowsCreateParams, WorkflowsExecuteParams,
};

use uuid::Uuid;

/// Protocol version this server speaks. Initialize requires an exact match.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Generate a new request id for server-initiated requests
pub fn generate_request_id() -> RequestId {
    RequestId::String(Uuid::new_v4().to_string())
}

/// Whether a client-offered protocol version is acceptable
pub fn protocol_version_compatible(version: &str) -> bool {
    version == MCP_PROTOCOL_VERSION
}
