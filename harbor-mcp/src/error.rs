//! Error types for MCP operations

use std::time::Duration;
use thiserror::Error;

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Comprehensive error type for MCP operations.
///
/// Variants map onto the JSON-RPC wire codes in
/// [`crate::protocol::jsonrpc`]. Authentication, authorization and
/// rate-limit failures are surfaced to clients as `internal_error` for
/// uniformity; their true kind is preserved in the audit log.
#[derive(Error, Debug)]
pub enum McpError {
    /// Malformed JSON or JSON-RPC framing
    #[error("Parse error: {details}")]
    Parse { details: String },

    /// Well-formed JSON that is not a valid JSON-RPC message
    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    /// Unknown method
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// Invalid method parameters
    #[error("Invalid parameters for {method}: {details}")]
    InvalidParams { method: String, details: String },

    /// Internal server error (handler panics, shutdown in progress,
    /// session limit exceeded)
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Request exceeded the configured size limit
    #[error("Request too large: {size} bytes exceeds limit of {limit}")]
    RequestTooLarge { size: usize, limit: usize },

    /// Per-request timeout elapsed
    #[error("Request timed out after {timeout:?}")]
    RequestTimeout { timeout: Duration },

    /// Authentication failure
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Authorization / capability denial
    #[error("Authorization denied: {reason}")]
    AuthorizationDenied { reason: String },

    /// Access denied by IP rules
    #[error("Access denied for {ip}: {reason}")]
    IpDenied { ip: String, reason: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded for {operation}, retry after {retry_after_secs}s")]
    RateLimited {
        operation: String,
        retry_after_secs: u64,
    },

    /// Resource could not be resolved
    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },

    /// Resource exists but access was refused
    #[error("Resource access denied: {uri}")]
    ResourceAccessDenied { uri: String },

    /// Tool lookup failure
    #[error("Tool not found: {tool_name}")]
    ToolNotFound { tool_name: String },

    /// Tool execution failure
    #[error("Tool execution failed: {tool_name}: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// Workflow compilation failure (cycle, unresolved tool, bad spec)
    #[error("Workflow compilation failed: {details}")]
    WorkflowCompilation { details: String },

    /// Workflow execution failure
    #[error("Workflow execution failed: {details}")]
    WorkflowExecution { details: String },

    /// Transport-level errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Session lifecycle violations (not initialized, shutting down)
    #[error("Session error: {message}")]
    Session { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {details}")]
    Serialization { details: String },

    /// Operation cancelled
    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },
}

impl McpError {
    /// Create a parse error
    pub fn parse(details: impl Into<String>) -> Self {
        Self::Parse {
            details: details.into(),
        }
    }

    /// Create an invalid-request error
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::InvalidRequest {
            details: details.into(),
        }
    }

    /// Create a method-not-found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Create an invalid-params error
    pub fn invalid_params(method: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidParams {
            method: method.into(),
            details: details.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an authentication failure
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Create an authorization denial
    pub fn authorization_denied(reason: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            reason: reason.into(),
        }
    }

    /// Create a resource-not-found error
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound { uri: uri.into() }
    }

    /// Create a tool-execution failure
    pub fn tool_execution_failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McpError::RateLimited { .. }
                | McpError::RequestTimeout { .. }
                | McpError::Transport { .. }
                | McpError::Internal { .. }
        )
    }

    /// Suggested delay before retrying, when one is known
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            McpError::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            McpError::Transport { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Serialization {
            details: err.to_string(),
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Transport {
            message: err.to_string(),
        }
    }
}
