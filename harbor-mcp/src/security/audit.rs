//! Audit logging with sensitive-field redaction

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::McpResult;

/// Kind of event an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryType {
    Authentication,
    Authorization,
    Operation,
    SecurityEvent,
    RateLimit,
    Error,
}

/// One audit record. Params and metadata are redacted before the entry
/// is constructed; sinks never see sensitive values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type")]
    pub entry_type: AuditEntryType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    pub params: Value,

    /// Outcome: "success" or "denied: <reason>"
    pub result: String,

    pub metadata: Value,
}

/// Destination for serialized audit entries. Implementations may buffer
/// and rotate.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: &AuditEntry) -> McpResult<()>;
}

/// In-memory sink with retention-based cleanup, used by the binary's
/// default wiring and the test suite.
pub struct MemoryAuditSink {
    entries: RwLock<Vec<AuditEntry>>,
    retention: Duration,
}

impl MemoryAuditSink {
    pub fn new(retention_days: u32) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    /// All retained entries, oldest first.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    /// Entries of one type, oldest first.
    pub async fn entries_of_type(&self, entry_type: AuditEntryType) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.entry_type == entry_type)
            .cloned()
            .collect()
    }

    /// Drop entries older than the retention period.
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.timestamp > cutoff);
        before - entries.len()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, entry: &AuditEntry) -> McpResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }
}

/// Writes structured audit entries through a sink, applying redaction
/// on the way in. Entries from one logger are totally ordered.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

/// Identifies the actor an entry is about
#[derive(Debug, Clone, Default)]
pub struct AuditActor {
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn log(
        &self,
        entry_type: AuditEntryType,
        actor: &AuditActor,
        operation: Option<&str>,
        params: Value,
        result: impl Into<String>,
        metadata: Value,
    ) {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            entry_type,
            client_id: actor.client_id.clone(),
            user_id: actor.user_id.clone(),
            session_id: actor.session_id.clone(),
            operation: operation.map(str::to_string),
            params: redact(params),
            result: result.into(),
            metadata: redact(metadata),
        };

        if let Err(e) = self.sink.write(&entry).await {
            tracing::error!(error = %e, "Failed to write audit entry");
        }
    }

    pub async fn log_authentication(&self, actor: &AuditActor, result: impl Into<String>) {
        self.log(
            AuditEntryType::Authentication,
            actor,
            None,
            Value::Null,
            result,
            Value::Null,
        )
        .await;
    }

    pub async fn log_authorization(
        &self,
        actor: &AuditActor,
        operation: &str,
        result: impl Into<String>,
    ) {
        self.log(
            AuditEntryType::Authorization,
            actor,
            Some(operation),
            Value::Null,
            result,
            Value::Null,
        )
        .await;
    }

    pub async fn log_operation(
        &self,
        actor: &AuditActor,
        operation: &str,
        params: Value,
        result: impl Into<String>,
    ) {
        self.log(
            AuditEntryType::Operation,
            actor,
            Some(operation),
            params,
            result,
            Value::Null,
        )
        .await;
    }

    pub async fn log_rate_limit(&self, actor: &AuditActor, operation: &str, retry_after: u64) {
        self.log(
            AuditEntryType::RateLimit,
            actor,
            Some(operation),
            Value::Null,
            format!("denied: rate limited, retry after {}s", retry_after),
            serde_json::json!({"retry_after": retry_after}),
        )
        .await;
    }

    pub async fn log_security_event(
        &self,
        actor: &AuditActor,
        event: &str,
        metadata: Value,
    ) {
        self.log(
            AuditEntryType::SecurityEvent,
            actor,
            Some(event),
            Value::Null,
            "recorded",
            metadata,
        )
        .await;
    }

    pub async fn log_error(&self, actor: &AuditActor, operation: &str, error: &str) {
        self.log(
            AuditEntryType::Error,
            actor,
            Some(operation),
            Value::Null,
            format!("error: {}", error),
            Value::Null,
        )
        .await;
    }
}

const SENSITIVE_MARKERS: &[&str] = &["password", "token", "secret", "apikey", "credentials"];

/// Replace values of sensitive-named fields with "[REDACTED]",
/// recursively through objects and arrays.
pub fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, val)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String("[REDACTED]".to_string()))
                    } else {
                        (key, redact(val))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_flat_fields() {
        let redacted = redact(serde_json::json!({
            "user": "alice",
            "password": "hunter2",
            "apiKey": "abcdef",
            "session_token": "xyz",
        }));
        assert_eq!(redacted["user"], "alice");
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["apiKey"], "[REDACTED]");
        assert_eq!(redacted["session_token"], "[REDACTED]");
    }

    #[test]
    fn test_redact_nested_and_arrays() {
        let redacted = redact(serde_json::json!({
            "outer": {"clientSecret": "s", "name": "n"},
            "list": [{"credentials": {"a": 1}}, {"plain": 2}],
        }));
        assert_eq!(redacted["outer"]["clientSecret"], "[REDACTED]");
        assert_eq!(redacted["outer"]["name"], "n");
        assert_eq!(redacted["list"][0]["credentials"], "[REDACTED]");
        assert_eq!(redacted["list"][1]["plain"], 2);
    }

    #[tokio::test]
    async fn test_logger_redacts_before_sink() {
        let sink = Arc::new(MemoryAuditSink::new(90));
        let logger = AuditLogger::new(sink.clone());

        logger
            .log_operation(
                &AuditActor {
                    client_id: Some("c1".into()),
                    ..Default::default()
                },
                "tools/call",
                serde_json::json!({"name": "echo", "token": "sensitive"}),
                "success",
            )
            .await;

        let entries = sink.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].params["token"], "[REDACTED]");
        assert_eq!(entries[0].params["name"], "echo");
        assert_eq!(entries[0].entry_type, AuditEntryType::Operation);
    }

    #[tokio::test]
    async fn test_entries_of_type_filter() {
        let sink = Arc::new(MemoryAuditSink::new(90));
        let logger = AuditLogger::new(sink.clone());
        let actor = AuditActor::default();

        logger.log_authentication(&actor, "success").await;
        logger.log_authorization(&actor, "tools/call", "success").await;
        logger.log_authentication(&actor, "denied: bad token").await;

        let auth = sink.entries_of_type(AuditEntryType::Authentication).await;
        assert_eq!(auth.len(), 2);
        assert_eq!(auth[1].result, "denied: bad token");
    }
}
