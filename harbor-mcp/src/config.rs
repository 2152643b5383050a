//! Server configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::McpResult;
use crate::protocol::CapabilityOverrides;

/// Transport selection for the server binary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    Websocket,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Stdio
    }
}

/// Top-level configuration for the MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport type to use
    #[serde(default)]
    pub transport: TransportKind,

    /// Bind host for network transports
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port for network transports
    #[serde(default = "default_port")]
    pub port: u16,

    /// Advertised server name
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Capability advertisement overrides
    #[serde(default)]
    pub capabilities: CapabilityOverrides,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub ratelimit: RateLimitConfig,

    #[serde(default)]
    pub ip_acl: IpAclConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub dlq: DlqConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            capabilities: CapabilityOverrides::default(),
            protocol: ProtocolConfig::default(),
            session: SessionConfig::default(),
            security: SecurityConfig::default(),
            ratelimit: RateLimitConfig::default(),
            ip_acl: IpAclConfig::default(),
            audit: AuditConfig::default(),
            dlq: DlqConfig::default(),
            delivery: DeliveryConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

/// Protocol-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ProtocolConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum concurrent sessions server-wide
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum in-flight requests per session
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Maximum concurrent token sessions per user
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

/// Token and request-size security settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Token lifetime in seconds
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,

    /// Window before expiry in which refresh is permitted, in seconds
    #[serde(default = "default_refresh_window_seconds")]
    pub refresh_window_seconds: u64,

    /// Per-server signing salt
    #[serde(default = "default_token_salt")]
    pub token_salt: String,

    /// Maximum accepted request size in bytes
    #[serde(default = "default_request_max_size_bytes")]
    pub request_max_size_bytes: usize,

    /// Whether the geo layer of the IP filter is consulted
    #[serde(default)]
    pub enable_geo_blocking: bool,

    /// Accept requests without credentials as the anonymous identity.
    /// Suits local stdio deployments; network deployments disable it.
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: default_token_ttl_seconds(),
            refresh_window_seconds: default_refresh_window_seconds(),
            token_salt: default_token_salt(),
            request_max_size_bytes: default_request_max_size_bytes(),
            enable_geo_blocking: false,
            allow_anonymous: true,
        }
    }
}

/// Token-bucket sizing for one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    pub max_tokens: f64,

    /// Tokens restored per second
    pub refill_rate: f64,

    /// Extra burst allowance above max_tokens
    pub burst: f64,
}

/// Client bucket sizing per priority tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientPriorityConfig {
    #[serde(default = "default_normal_bucket")]
    pub normal: BucketConfig,

    #[serde(default = "default_high_bucket")]
    pub high: BucketConfig,

    #[serde(default = "default_critical_bucket")]
    pub critical: BucketConfig,
}

impl Default for ClientPriorityConfig {
    fn default() -> Self {
        Self {
            normal: default_normal_bucket(),
            high: default_high_bucket(),
            critical: default_critical_bucket(),
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Server-wide bucket
    #[serde(default = "default_global_bucket")]
    pub global: BucketConfig,

    /// Per-client buckets keyed by priority
    #[serde(default)]
    pub client: ClientPriorityConfig,

    /// Token cost per operation; operations absent from the map cost 1
    #[serde(default = "default_operation_costs")]
    pub operation_costs: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: default_global_bucket(),
            client: ClientPriorityConfig::default(),
            operation_costs: default_operation_costs(),
        }
    }
}

impl RateLimitConfig {
    /// Token cost of an operation
    pub fn cost_of(&self, operation: &str) -> u32 {
        self.operation_costs.get(operation).copied().unwrap_or(1)
    }
}

/// IP access-control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAclConfig {
    /// Verdict when no rule matches
    #[serde(default = "default_true")]
    pub allow_by_default: bool,

    /// Auth failures before an automatic temporary block
    #[serde(default = "default_max_failures_before_block")]
    pub max_failures_before_block: u32,

    /// Duration of automatic blocks in seconds
    #[serde(default = "default_block_duration_seconds")]
    pub block_duration_seconds: u64,
}

impl Default for IpAclConfig {
    fn default() -> Self {
        Self {
            allow_by_default: true,
            max_failures_before_block: default_max_failures_before_block(),
            block_duration_seconds: default_block_duration_seconds(),
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_retention_days")]
    pub retention_days: u32,

    /// Rotation threshold for file-backed sinks
    #[serde(default = "default_file_rotation_bytes")]
    pub file_rotation_bytes: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_audit_retention_days(),
            file_rotation_bytes: default_file_rotation_bytes(),
        }
    }
}

/// Dead-letter queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    #[serde(default = "default_dlq_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_dlq_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_dlq_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_dlq_retention_days")]
    pub retention_days: u32,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_retries: default_dlq_max_retries(),
            base_delay_ms: default_dlq_base_delay_ms(),
            max_delay_ms: default_dlq_max_delay_ms(),
            retention_days: default_dlq_retention_days(),
        }
    }
}

/// Message-delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Delivery attempts before a message is handed to the DLQ
    #[serde(default = "default_delivery_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_delivery_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_delivery_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_delivery_max_attempts(),
            base_delay_ms: default_delivery_base_delay_ms(),
            max_delay_ms: default_delivery_max_delay_ms(),
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Default workflow-level timeout in milliseconds
    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum steps executing concurrently per workflow
    #[serde(default = "default_workflow_fan_out")]
    pub max_fan_out: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_workflow_timeout_ms(),
            max_fan_out: default_workflow_fan_out(),
        }
    }
}

// Default value functions

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_server_name() -> String {
    "harbor-mcp".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_sessions() -> usize {
    100
}

fn default_max_concurrent_requests() -> usize {
    50
}

fn default_max_sessions_per_user() -> usize {
    5
}

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_refresh_window_seconds() -> u64 {
    300
}

fn default_token_salt() -> String {
    "harbor-dev-salt".to_string()
}

fn default_request_max_size_bytes() -> usize {
    1_048_576
}

fn default_global_bucket() -> BucketConfig {
    BucketConfig {
        max_tokens: 10_000.0,
        refill_rate: 100.0,
        burst: 1_000.0,
    }
}

fn default_normal_bucket() -> BucketConfig {
    BucketConfig {
        max_tokens: 100.0,
        refill_rate: 10.0,
        burst: 20.0,
    }
}

fn default_high_bucket() -> BucketConfig {
    BucketConfig {
        max_tokens: 500.0,
        refill_rate: 50.0,
        burst: 100.0,
    }
}

fn default_critical_bucket() -> BucketConfig {
    BucketConfig {
        max_tokens: 2_000.0,
        refill_rate: 200.0,
        burst: 400.0,
    }
}

fn default_operation_costs() -> HashMap<String, u32> {
    let mut costs = HashMap::new();
    costs.insert("tools/list".to_string(), 1);
    costs.insert("tools/call".to_string(), 5);
    costs.insert("resources/read".to_string(), 2);
    costs.insert("workflows/execute".to_string(), 20);
    costs.insert("sampling/createMessage".to_string(), 15);
    costs
}

fn default_max_failures_before_block() -> u32 {
    5
}

fn default_block_duration_seconds() -> u64 {
    300
}

fn default_audit_retention_days() -> u32 {
    90
}

fn default_file_rotation_bytes() -> u64 {
    100_000_000
}

fn default_dlq_max_retries() -> u32 {
    3
}

fn default_dlq_base_delay_ms() -> u64 {
    1_000
}

fn default_dlq_max_delay_ms() -> u64 {
    300_000
}

fn default_dlq_retention_days() -> u32 {
    7
}

fn default_delivery_max_attempts() -> u32 {
    5
}

fn default_delivery_base_delay_ms() -> u64 {
    500
}

fn default_delivery_max_delay_ms() -> u64 {
    60_000
}

fn default_workflow_timeout_ms() -> u64 {
    30_000
}

fn default_workflow_fan_out() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: &str) -> McpResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::error::McpError::configuration(format!(
                "Failed to read config file '{}': {}",
                path, e
            ))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            crate::error::McpError::configuration(format!(
                "Failed to parse config file '{}': {}",
                path, e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> McpResult<()> {
        if self.port == 0 && self.transport != TransportKind::Stdio {
            return Err(crate::error::McpError::configuration(
                "port cannot be 0 for network transports",
            ));
        }
        if self.session.max_sessions == 0 {
            return Err(crate::error::McpError::configuration(
                "session.max_sessions cannot be 0",
            ));
        }
        if self.session.max_concurrent_requests == 0 {
            return Err(crate::error::McpError::configuration(
                "session.max_concurrent_requests cannot be 0",
            ));
        }
        if self.protocol.request_timeout_ms == 0 {
            return Err(crate::error::McpError::configuration(
                "protocol.request_timeout_ms cannot be 0",
            ));
        }
        if self.security.request_max_size_bytes == 0 {
            return Err(crate::error::McpError::configuration(
                "security.request_max_size_bytes cannot be 0",
            ));
        }
        if self.ratelimit.global.refill_rate <= 0.0 {
            return Err(crate::error::McpError::configuration(
                "ratelimit.global.refill_rate must be positive",
            ));
        }
        if self.dlq.base_delay_ms == 0 {
            return Err(crate::error::McpError::configuration(
                "dlq.base_delay_ms cannot be 0",
            ));
        }
        Ok(())
    }

    /// Merge environment-variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("HARBOR_MCP_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("HARBOR_MCP_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(transport) = std::env::var("HARBOR_MCP_TRANSPORT") {
            match transport.to_lowercase().as_str() {
                "stdio" => self.transport = TransportKind::Stdio,
                "sse" => self.transport = TransportKind::Sse,
                "websocket" => self.transport = TransportKind::Websocket,
                _ => {}
            }
        }
        if let Ok(salt) = std::env::var("HARBOR_MCP_TOKEN_SALT") {
            self.security.token_salt = salt;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.max_sessions, 100);
        assert_eq!(config.session.max_concurrent_requests, 50);
        assert_eq!(config.protocol.request_timeout_ms, 30_000);
        assert_eq!(config.security.token_ttl_seconds, 3600);
        assert_eq!(config.security.request_max_size_bytes, 1_048_576);
    }

    #[test]
    fn test_operation_cost_defaults() {
        let config = RateLimitConfig::default();
        assert_eq!(config.cost_of("tools/call"), 5);
        assert_eq!(config.cost_of("workflows/execute"), 20);
        assert_eq!(config.cost_of("sampling/createMessage"), 15);
        assert_eq!(config.cost_of("ping"), 1);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = ServerConfig::default();
        config.session.max_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.protocol.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = ServerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.session.max_sessions, config.session.max_sessions);
        assert_eq!(back.dlq.max_retries, config.dlq.max_retries);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ServerConfig =
            serde_yaml::from_str("session:\n  max_sessions: 7\n").unwrap();
        assert_eq!(config.session.max_sessions, 7);
        assert_eq!(config.session.max_concurrent_requests, 50);
        assert_eq!(config.ip_acl.max_failures_before_block, 5);
    }
}
