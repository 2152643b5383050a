//! JSON-RPC 2.0 framing: message types, classification, and error codes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{McpError, McpResult};

/// JSON-RPC protocol version marker
pub const JSONRPC_VERSION: &str = "2.0";

/// Wire error codes, including the MCP-specific extensions
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const RESOURCE_NOT_FOUND: i32 = -32001;
    pub const RESOURCE_ACCESS_DENIED: i32 = -32002;
    pub const TOOL_EXECUTION_FAILED: i32 = -32003;
}

/// Request identifier: a non-empty string or an integer.
///
/// Null, float and empty-string ids are rejected at classification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) if !s.is_empty() => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A method call expecting exactly one response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A successful response carrying a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// A failed response carrying an error object.
///
/// `id` is absent when the failing request's id could not be derived
/// (serialized as `null`, as JSON-RPC requires).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: JsonRpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }
}

/// A one-way message with no response expected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, details, None)
    }

    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, details, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
            None,
        )
    }

    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, details, None)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message, None)
    }
}

/// A classified JSON-RPC message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    /// Parse a single message from raw JSON text.
    pub fn parse(raw: &str) -> McpResult<Message> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| McpError::parse(format!("invalid JSON: {}", e)))?;
        Self::classify(value)
    }

    /// Classify a parsed JSON value as one of the four message shapes.
    ///
    /// Shape rules: a request has `method` and a valid `id`; a
    /// notification has `method` and no `id` key; a response has an `id`
    /// and exactly one of `result`/`error`. Anything else is invalid.
    pub fn classify(value: Value) -> McpResult<Message> {
        let obj = match value {
            Value::Object(map) => map,
            other => {
                return Err(McpError::invalid_request(format!(
                    "expected a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(v) => {
                return Err(McpError::invalid_request(format!(
                    "unsupported jsonrpc version: {}",
                    v
                )))
            }
            None => return Err(McpError::invalid_request("missing jsonrpc version field")),
        }

        let method = obj.get("method").and_then(Value::as_str);
        let has_id_key = obj.contains_key("id");
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        let params = obj.get("params").cloned();

        if let Some(p) = &params {
            if !p.is_object() && !p.is_array() {
                return Err(McpError::invalid_request(
                    "params must be an object or an array",
                ));
            }
        }

        match (method, has_id_key) {
            (Some(m), true) => {
                if m.is_empty() {
                    return Err(McpError::invalid_request("method must be non-empty"));
                }
                if has_result || has_error {
                    return Err(McpError::invalid_request(
                        "request must not carry result or error",
                    ));
                }
                let id = RequestId::from_value(obj.get("id").unwrap_or(&Value::Null)).ok_or_else(
                    || McpError::invalid_request("id must be a non-empty string or an integer"),
                )?;
                Ok(Message::Request(JsonRpcRequest {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    method: m.to_string(),
                    params,
                }))
            }
            (Some(m), false) => {
                if m.is_empty() {
                    return Err(McpError::invalid_request("method must be non-empty"));
                }
                if has_result || has_error {
                    return Err(McpError::invalid_request(
                        "notification must not carry result or error",
                    ));
                }
                Ok(Message::Notification(JsonRpcNotification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method: m.to_string(),
                    params,
                }))
            }
            (None, true) => match (has_result, has_error) {
                (true, false) => {
                    let id = RequestId::from_value(obj.get("id").unwrap_or(&Value::Null))
                        .ok_or_else(|| {
                            McpError::invalid_request(
                                "id must be a non-empty string or an integer",
                            )
                        })?;
                    Ok(Message::Response(JsonRpcResponse {
                        jsonrpc: JSONRPC_VERSION.to_string(),
                        id,
                        result: obj.get("result").cloned().unwrap_or(Value::Null),
                    }))
                }
                (false, true) => {
                    // Error responses may carry id null when the failing
                    // request's id was underivable.
                    let id = match obj.get("id") {
                        Some(Value::Null) | None => None,
                        Some(v) => Some(RequestId::from_value(v).ok_or_else(|| {
                            McpError::invalid_request(
                                "id must be null, a non-empty string or an integer",
                            )
                        })?),
                    };
                    let error: JsonRpcError =
                        serde_json::from_value(obj.get("error").cloned().unwrap_or(Value::Null))
                            .map_err(|e| {
                                McpError::invalid_request(format!("malformed error object: {}", e))
                            })?;
                    Ok(Message::Error(JsonRpcErrorResponse {
                        jsonrpc: JSONRPC_VERSION.to_string(),
                        id,
                        error,
                    }))
                }
                (true, true) => Err(McpError::invalid_request(
                    "response must carry exactly one of result or error",
                )),
                (false, false) => Err(McpError::invalid_request(
                    "message carries an id but neither method, result nor error",
                )),
            },
            (None, false) => Err(McpError::invalid_request(
                "message carries neither method nor id",
            )),
        }
    }

    /// Parse a batch. An empty batch is rejected outright; a malformed
    /// element poisons only its own slot.
    pub fn parse_batch(values: Vec<Value>) -> McpResult<Vec<McpResult<Message>>> {
        if values.is_empty() {
            return Err(McpError::invalid_request("batch must not be empty"));
        }
        Ok(values.into_iter().map(Self::classify).collect())
    }

    /// Serialize this message for the wire.
    pub fn encode(&self) -> McpResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The message id, when the shape has one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Response(r) => Some(&r.id),
            Message::Error(e) => e.id.as_ref(),
            Message::Notification(_) => None,
        }
    }

    /// The method name, when the shape has one.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Notification(_))
    }
}

/// Incoming wire payload: a single message or a batch
#[derive(Debug)]
pub enum Incoming {
    Single(McpResult<Message>),
    Batch(Vec<McpResult<Message>>),
}

impl Incoming {
    /// Parse raw text into a single message or a batch.
    pub fn parse(raw: &str) -> McpResult<Incoming> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| McpError::parse(format!("invalid JSON: {}", e)))?;
        match value {
            Value::Array(items) => Ok(Incoming::Batch(Message::parse_batch(items)?)),
            other => Ok(Incoming::Single(Message::classify(other))),
        }
    }
}

/// Attempt to recover a request id from malformed JSON text, so parse
/// errors can still be correlated when possible.
pub fn derive_id(raw: &str) -> Option<RequestId> {
    let value: Value = serde_json::from_str(raw).ok()?;
    RequestId::from_value(value.get("id")?)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Parse { details } => JsonRpcError::parse_error(details),
            McpError::InvalidRequest { details } => JsonRpcError::invalid_request(details),
            McpError::RequestTooLarge { size, limit } => JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Request of {} bytes exceeds limit of {}", size, limit),
                Some(serde_json::json!({"type": "request_too_large"})),
            ),
            McpError::MethodNotFound { method } => JsonRpcError::method_not_found(&method),
            McpError::InvalidParams { details, .. } => JsonRpcError::invalid_params(details),
            McpError::ResourceNotFound { uri } => JsonRpcError::new(
                error_codes::RESOURCE_NOT_FOUND,
                format!("Resource not found: {}", uri),
                Some(serde_json::json!({"type": "resource_not_found"})),
            ),
            McpError::ResourceAccessDenied { uri } => JsonRpcError::new(
                error_codes::RESOURCE_ACCESS_DENIED,
                format!("Resource access denied: {}", uri),
                Some(serde_json::json!({"type": "resource_access_denied"})),
            ),
            McpError::ToolNotFound { tool_name } => {
                JsonRpcError::invalid_params(format!("Unknown tool: {}", tool_name))
            }
            McpError::ToolExecutionFailed { tool_name, reason } => JsonRpcError::new(
                error_codes::TOOL_EXECUTION_FAILED,
                reason,
                Some(serde_json::json!({"tool": tool_name, "type": "tool_execution_failed"})),
            ),
            // Auth, authz and rate-limit denials surface uniformly as
            // internal errors; the audit log keeps their true kind.
            McpError::AuthenticationFailed { .. } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "Authentication failed",
                Some(serde_json::json!({"type": "authentication_failed"})),
            ),
            McpError::AuthorizationDenied { .. } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "Authorization denied",
                Some(serde_json::json!({"type": "authorization_denied"})),
            ),
            McpError::IpDenied { .. } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "Access denied",
                Some(serde_json::json!({"type": "access_denied"})),
            ),
            McpError::RateLimited {
                retry_after_secs, ..
            } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                "Rate limit exceeded",
                Some(serde_json::json!({
                    "type": "rate_limited",
                    "retry_after": retry_after_secs,
                })),
            ),
            McpError::RequestTimeout { timeout } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                format!("Request timed out after {}s", timeout.as_secs()),
                Some(serde_json::json!({"type": "timeout"})),
            ),
            McpError::WorkflowCompilation { details } => JsonRpcError::invalid_params(details),
            McpError::WorkflowExecution { details } => JsonRpcError::new(
                error_codes::INTERNAL_ERROR,
                details,
                Some(serde_json::json!({"type": "workflow_failed"})),
            ),
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }
}
