//! Security pipeline: authentication, IP access control, rate limiting,
//! capability authorization and audit logging, in strict order.
//!
//! Each layer assumes the previous one passed. Any denial produces
//! exactly one audit entry of the corresponding type and the catalog is
//! never reached.

pub mod audit;
pub mod auth;
pub mod authz;
pub mod ip_filter;
pub mod monitor;
pub mod rate_limit;

pub use audit::{AuditActor, AuditEntry, AuditEntryType, AuditLogger, AuditSink, MemoryAuditSink};
pub use auth::{
    AuthManager, AuthOutcome, Credential, Identity, IdentityProvider, StaticIdentityProvider,
    TokenManager, TokenSession, MIN_API_KEY_LEN,
};
pub use authz::{has_capability, required_capability, Authorizer};
pub use ip_filter::{
    AllowAllGeoProvider, GeoProvider, IpFilter, IpPattern, IpRule, IpRuleType, IpVerdict,
};
pub use monitor::{AlertThreshold, SecurityAlert, SecurityMetric, SecurityMonitor};
pub use rate_limit::{ClientPriority, RateLimitDenial, RateLimiter};

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::{McpError, McpResult};

/// Security context attached to an authenticated request, passed by value
/// to every authorization check.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub client_id: String,
    pub user_id: String,
    pub session_id: String,
    pub ip_address: String,
    pub capabilities: HashSet<String>,
    pub roles: HashSet<String>,
    pub metadata: Value,
}

impl SecurityContext {
    fn actor(&self) -> AuditActor {
        AuditActor {
            client_id: Some(self.client_id.clone()),
            user_id: Some(self.user_id.clone()),
            session_id: Some(self.session_id.clone()),
        }
    }
}

/// One request's worth of input to the pipeline
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub client_id: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub operation: String,
    pub resource_uri: Option<String>,
    pub credential: Option<Credential>,
    pub params: Value,
}

impl AccessRequest {
    pub fn new(client_id: impl Into<String>, ip_address: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ip_address: ip_address.into(),
            user_agent: None,
            operation: operation.into(),
            resource_uri: None,
            credential: None,
            params: Value::Null,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_resource_uri(mut self, uri: impl Into<String>) -> Self {
        self.resource_uri = Some(uri.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// The layered security pipeline
pub struct SecurityPipeline {
    auth: AuthManager,
    ip_filter: IpFilter,
    rate_limiter: RateLimiter,
    authorizer: Authorizer,
    audit: AuditLogger,
    monitor: SecurityMonitor,
    provider: Arc<dyn IdentityProvider>,
    allow_anonymous: bool,
}

impl SecurityPipeline {
    pub fn new(
        config: &ServerConfig,
        provider: Arc<dyn IdentityProvider>,
        geo: Arc<dyn GeoProvider>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let tokens = TokenManager::new(&config.security, config.session.max_sessions_per_user);
        Self {
            auth: AuthManager::new(tokens, provider.clone()),
            ip_filter: IpFilter::new(
                config.ip_acl.clone(),
                config.security.enable_geo_blocking,
                geo,
            ),
            rate_limiter: RateLimiter::new(config.ratelimit.clone()),
            authorizer: Authorizer,
            audit: AuditLogger::new(sink),
            monitor: SecurityMonitor::new(),
            provider,
            allow_anonymous: config.security.allow_anonymous,
        }
    }

    /// Run all five layers for one request. Returns the security context
    /// the handler executes under.
    pub async fn authorize_request(&self, request: &AccessRequest) -> McpResult<SecurityContext> {
        // Layer 1: authenticate
        let (identity, capabilities, auth_session_id) = match &request.credential {
            Some(credential) => {
                let outcome = match self
                    .auth
                    .authenticate(
                        credential,
                        Some(request.ip_address.clone()),
                        request.user_agent.clone(),
                    )
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.on_auth_failure(request, &err).await;
                        return Err(err);
                    }
                };
                (
                    outcome.identity,
                    outcome.capabilities,
                    outcome.session.id.clone(),
                )
            }
            None if self.allow_anonymous => {
                let identity = Identity {
                    user_id: "anonymous".to_string(),
                    roles: HashSet::from(["anonymous".to_string()]),
                    metadata: Value::Null,
                };
                let capabilities = self.provider.capabilities(&identity).await;
                (identity, capabilities, request.client_id.clone())
            }
            None => {
                let err = McpError::authentication_failed("missing credentials");
                self.on_auth_failure(request, &err).await;
                return Err(err);
            }
        };

        let context = SecurityContext {
            client_id: request.client_id.clone(),
            user_id: identity.user_id,
            session_id: auth_session_id,
            ip_address: request.ip_address.clone(),
            capabilities,
            roles: identity.roles,
            metadata: identity.metadata,
        };

        // Layer 2: IP access control
        if let IpVerdict::Denied { reason } = self.ip_filter.evaluate(&request.ip_address).await {
            self.monitor.record(SecurityMetric::SecurityEvent).await;
            self.audit
                .log(
                    AuditEntryType::SecurityEvent,
                    &context.actor(),
                    Some(&request.operation),
                    Value::Null,
                    format!("denied: {}", reason),
                    serde_json::json!({"ip": request.ip_address}),
                )
                .await;
            return Err(McpError::IpDenied {
                ip: request.ip_address.clone(),
                reason,
            });
        }

        // Layer 3: rate limiting
        if let Err(denial) = self
            .rate_limiter
            .try_acquire(&request.client_id, &request.operation)
            .await
        {
            self.monitor.record(SecurityMetric::RateLimitDenial).await;
            self.audit
                .log_rate_limit(&context.actor(), &request.operation, denial.retry_after_secs)
                .await;
            return Err(McpError::RateLimited {
                operation: request.operation.clone(),
                retry_after_secs: denial.retry_after_secs,
            });
        }

        // Layer 4: capability authorization
        if let Err(err) = self.authorizer.check(
            &context.capabilities,
            &request.operation,
            request.resource_uri.as_deref(),
        ) {
            self.audit
                .log_authorization(
                    &context.actor(),
                    &request.operation,
                    format!("denied: {}", err),
                )
                .await;
            return Err(err);
        }

        // Layer 5: audit the admitted operation
        self.audit
            .log_operation(
                &context.actor(),
                &request.operation,
                request.params.clone(),
                "success",
            )
            .await;

        Ok(context)
    }

    async fn on_auth_failure(&self, request: &AccessRequest, err: &McpError) {
        if self
            .ip_filter
            .record_auth_failure(&request.ip_address)
            .await
            .is_some()
        {
            tracing::warn!(
                ip = %request.ip_address,
                "Repeated authentication failures, temporary block installed"
            );
        }
        self.monitor.record(SecurityMetric::AuthFailure).await;
        self.audit
            .log_authentication(
                &AuditActor {
                    client_id: Some(request.client_id.clone()),
                    ..Default::default()
                },
                format!("denied: {}", err),
            )
            .await;
    }

    /// Report an external security event. `brute_force_attempt` installs
    /// a temporary block for the offending address directly.
    pub async fn report_security_event(&self, event: &str, ip_address: &str, metadata: Value) {
        self.monitor.record(SecurityMetric::SecurityEvent).await;

        if event == "brute_force_attempt" {
            self.ip_filter
                .block_for_security_event(ip_address, event)
                .await;
        }

        self.audit
            .log_security_event(
                &AuditActor::default(),
                event,
                crate::security::audit::redact(metadata),
            )
            .await;
    }

    /// Periodic upkeep: expired token sessions, revocations and IP rules.
    pub async fn maintain(&self) {
        self.auth.tokens().cleanup().await;
        let removed = self.ip_filter.cleanup_expired_rules().await;
        if removed > 0 {
            tracing::debug!(removed, "Expired IP rules removed");
        }
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    pub fn ip_filter(&self) -> &IpFilter {
        &self.ip_filter
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn monitor(&self) -> &SecurityMonitor {
        &self.monitor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::auth::pseudonymous_user_id;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn pipeline_with_sink() -> (SecurityPipeline, Arc<MemoryAuditSink>) {
        let config = ServerConfig::default();
        let sink = Arc::new(MemoryAuditSink::new(90));
        let pipeline = SecurityPipeline::new(
            &config,
            Arc::new(StaticIdentityProvider::permissive()),
            Arc::new(AllowAllGeoProvider),
            sink.clone(),
        );
        (pipeline, sink)
    }

    #[tokio::test]
    async fn test_full_pipeline_success() {
        let (pipeline, sink) = pipeline_with_sink();

        let request = AccessRequest::new("client-1", "10.0.0.1", "tools/call")
            .with_credential(Credential::ApiKey(KEY.into()))
            .with_params(serde_json::json!({"name": "echo"}));

        let ctx = pipeline.authorize_request(&request).await.unwrap();
        assert_eq!(ctx.user_id, pseudonymous_user_id(KEY));
        assert!(ctx.capabilities.contains("tools:*"));

        // Exactly one operation entry for the admitted request
        let ops = sink.entries_of_type(AuditEntryType::Operation).await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].result, "success");
    }

    #[tokio::test]
    async fn test_missing_credentials_denied_with_single_entry() {
        let mut config = ServerConfig::default();
        config.security.allow_anonymous = false;
        let sink = Arc::new(MemoryAuditSink::new(90));
        let pipeline = SecurityPipeline::new(
            &config,
            Arc::new(StaticIdentityProvider::permissive()),
            Arc::new(AllowAllGeoProvider),
            sink.clone(),
        );

        let request = AccessRequest::new("client-1", "10.0.0.1", "tools/call");
        let err = pipeline.authorize_request(&request).await.unwrap_err();
        assert!(matches!(err, McpError::AuthenticationFailed { .. }));

        let entries = sink.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, AuditEntryType::Authentication);
        assert!(entries[0].result.starts_with("denied"));
    }

    #[tokio::test]
    async fn test_anonymous_access_when_enabled() {
        let (pipeline, _sink) = pipeline_with_sink();

        let request = AccessRequest::new("client-1", "10.0.0.1", "tools/list");
        let ctx = pipeline.authorize_request(&request).await.unwrap();
        assert_eq!(ctx.user_id, "anonymous");
        assert!(ctx.capabilities.contains("tools:*"));
    }

    #[tokio::test]
    async fn test_bad_key_increments_failure_counter_until_block() {
        let (pipeline, _sink) = pipeline_with_sink();

        for _ in 0..5 {
            let request = AccessRequest::new("client-1", "10.9.9.9", "tools/call")
                .with_credential(Credential::ApiKey("short".into()));
            assert!(pipeline.authorize_request(&request).await.is_err());
        }

        // The fifth failure installed a temporary block
        assert!(matches!(
            pipeline.ip_filter().evaluate("10.9.9.9").await,
            IpVerdict::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn test_blacklisted_ip_denied_after_auth() {
        let (pipeline, sink) = pipeline_with_sink();
        pipeline
            .ip_filter()
            .add_rule(
                IpRule::new(
                    IpRuleType::Blacklist,
                    IpPattern::parse("172.16.0.0/12").unwrap(),
                    "test",
                )
                .with_reason("internal range"),
            )
            .await;

        let request = AccessRequest::new("client-1", "172.16.5.5", "tools/list")
            .with_credential(Credential::ApiKey(KEY.into()));
        let err = pipeline.authorize_request(&request).await.unwrap_err();
        assert!(matches!(err, McpError::IpDenied { .. }));

        let events = sink.entries_of_type(AuditEntryType::SecurityEvent).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_authz_denial_audited() {
        let config = ServerConfig::default();
        let sink = Arc::new(MemoryAuditSink::new(90));
        let provider = Arc::new(StaticIdentityProvider::new(
            ["tools:list".to_string()].into_iter().collect(),
        ));
        let pipeline = SecurityPipeline::new(
            &config,
            provider,
            Arc::new(AllowAllGeoProvider),
            sink.clone(),
        );

        let request = AccessRequest::new("client-1", "10.0.0.1", "tools/call")
            .with_credential(Credential::ApiKey(KEY.into()));
        let err = pipeline.authorize_request(&request).await.unwrap_err();
        assert!(matches!(err, McpError::AuthorizationDenied { .. }));

        let authz = sink.entries_of_type(AuditEntryType::Authorization).await;
        assert_eq!(authz.len(), 1);
        assert!(authz[0].result.contains("tools:call"));
    }

    #[tokio::test]
    async fn test_brute_force_event_installs_block() {
        let (pipeline, sink) = pipeline_with_sink();
        pipeline
            .report_security_event("brute_force_attempt", "4.4.4.4", Value::Null)
            .await;

        assert!(matches!(
            pipeline.ip_filter().evaluate("4.4.4.4").await,
            IpVerdict::Denied { .. }
        ));
        let events = sink.entries_of_type(AuditEntryType::SecurityEvent).await;
        assert_eq!(events.len(), 1);
    }
}
