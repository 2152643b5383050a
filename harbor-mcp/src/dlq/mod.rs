//! Dead-letter queue: failed signals with exponential-backoff retry,
//! retention cleanup and manual replay

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::DlqConfig;
use crate::metrics::{names, MetricsRegistry};
use crate::McpResult;
use harbor_resilience::BackoffCalculator;

/// Scheduler wake-up cadence
const SCHEDULER_TICK: Duration = Duration::from_secs(5);

/// Retention sweep cadence
const RETENTION_TICK: Duration = Duration::from_secs(3600);

/// Downstream router that dead-lettered signals are retried against
#[async_trait]
pub trait SignalRouter: Send + Sync {
    async fn route(&self, signal: &Value) -> McpResult<()>;
}

/// Entry status, derived from the retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    /// Waiting for its next retry
    Scheduled,
    /// Retries exhausted; waiting for manual action
    Failed,
}

/// One attempt's outcome in an entry's processing history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub attempted_at: DateTime<Utc>,
    pub outcome: String,
}

/// A dead-lettered signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    pub original_signal: Value,
    pub error: String,
    pub error_message: String,
    pub retry_count: u32,
    /// None exactly when retries are exhausted
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processing_history: Vec<ProcessingRecord>,
}

impl DlqEntry {
    pub fn status(&self) -> DlqStatus {
        if self.next_retry_at.is_some() {
            DlqStatus::Scheduled
        } else {
            DlqStatus::Failed
        }
    }
}

/// Filter for [`DeadLetterQueue::list`]
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub status: Option<DlqStatus>,
    pub error: Option<String>,
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub total: usize,
    pub scheduled: usize,
    pub failed: usize,
    pub oldest: Option<DateTime<Utc>>,
}

pub struct DeadLetterQueue {
    config: DlqConfig,
    backoff: BackoffCalculator,
    entries: RwLock<HashMap<Uuid, DlqEntry>>,
    metrics: MetricsRegistry,
}

impl DeadLetterQueue {
    pub fn new(config: DlqConfig, metrics: MetricsRegistry) -> Self {
        let backoff = BackoffCalculator::exponential(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        );
        Self {
            config,
            backoff,
            entries: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Store a failed signal. The first retry is scheduled one base
    /// delay out.
    pub async fn add(
        &self,
        signal: Value,
        error: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Uuid {
        let now = Utc::now();
        let entry = DlqEntry {
            id: Uuid::new_v4(),
            original_signal: signal,
            error: error.into(),
            error_message: error_message.into(),
            retry_count: 0,
            next_retry_at: Some(now + to_chrono(self.backoff.delay_for_attempt(0))),
            created_at: now,
            updated_at: now,
            processing_history: Vec::new(),
        };
        let id = entry.id;

        let mut entries = self.entries.write().await;
        entries.insert(id, entry);
        self.metrics
            .set_gauge(names::DLQ_ENTRIES, entries.len() as i64)
            .await;
        tracing::debug!(entry_id = %id, "Signal dead-lettered");
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<DlqEntry> {
        self.entries.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.entries.write().await.remove(&id).is_some();
        if removed {
            self.update_gauge().await;
        }
        removed
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        drop(entries);
        self.update_gauge().await;
        count
    }

    /// Entries matching a filter, oldest first.
    pub async fn list(&self, filter: &DlqFilter) -> Vec<DlqEntry> {
        let mut matched: Vec<DlqEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| {
                filter.status.map_or(true, |status| entry.status() == status)
                    && filter
                        .error
                        .as_ref()
                        .map_or(true, |error| &entry.error == error)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|entry| entry.created_at);
        matched
    }

    pub async fn stats(&self) -> DlqStats {
        let entries = self.entries.read().await;
        let scheduled = entries
            .values()
            .filter(|e| e.status() == DlqStatus::Scheduled)
            .count();
        DlqStats {
            total: entries.len(),
            scheduled,
            failed: entries.len() - scheduled,
            oldest: entries.values().map(|e| e.created_at).min(),
        }
    }

    /// Manually replay one entry, regardless of its schedule. Success
    /// deletes it; failure advances the retry bookkeeping.
    pub async fn retry(&self, id: Uuid, router: &Arc<dyn SignalRouter>) -> McpResult<bool> {
        let signal = match self.entries.read().await.get(&id) {
            Some(entry) => entry.original_signal.clone(),
            None => return Ok(false),
        };
        self.dispatch(id, &signal, router).await;
        Ok(true)
    }

    /// One scheduler pass: dispatch every due entry.
    pub async fn process_due(&self, router: &Arc<dyn SignalRouter>) -> usize {
        self.process_due_at(Utc::now(), router).await
    }

    async fn process_due_at(&self, now: DateTime<Utc>, router: &Arc<dyn SignalRouter>) -> usize {
        let due: Vec<(Uuid, Value)> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| {
                entry.retry_count < self.config.max_retries
                    && entry.next_retry_at.map_or(false, |at| at <= now)
            })
            .map(|entry| (entry.id, entry.original_signal.clone()))
            .collect();

        let count = due.len();
        for (id, signal) in due {
            self.dispatch(id, &signal, router).await;
        }
        count
    }

    async fn dispatch(&self, id: Uuid, signal: &Value, router: &Arc<dyn SignalRouter>) {
        self.metrics.incr(names::DLQ_RETRIES).await;
        let outcome = router.route(signal).await;
        let now = Utc::now();

        let mut entries = self.entries.write().await;
        match outcome {
            Ok(()) => {
                entries.remove(&id);
                tracing::debug!(entry_id = %id, "Dead-lettered signal delivered");
            }
            Err(err) => {
                if let Some(entry) = entries.get_mut(&id) {
                    entry.retry_count += 1;
                    entry.updated_at = now;
                    entry.processing_history.push(ProcessingRecord {
                        attempted_at: now,
                        outcome: format!("failed: {}", err),
                    });
                    if entry.retry_count >= self.config.max_retries {
                        entry.next_retry_at = None;
                        tracing::warn!(entry_id = %id, "Entry permanently failed after {} retries", entry.retry_count);
                    } else {
                        entry.next_retry_at = Some(
                            now + to_chrono(self.backoff.delay_for_attempt(entry.retry_count)),
                        );
                    }
                }
            }
        }
        drop(entries);
        self.update_gauge().await;
    }

    /// Drop entries older than the retention period.
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.config.retention_days));
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at > cutoff);
        let removed = before - entries.len();
        drop(entries);
        if removed > 0 {
            tracing::info!(removed, "Expired DLQ entries removed");
            self.update_gauge().await;
        }
        removed
    }

    /// Spawn the retry scheduler and the retention sweeper.
    pub fn start(self: &Arc<Self>, router: Arc<dyn SignalRouter>) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut retry_tick = tokio::time::interval(SCHEDULER_TICK);
            let mut retention_tick = tokio::time::interval(RETENTION_TICK);
            loop {
                tokio::select! {
                    _ = retry_tick.tick() => {
                        queue.process_due(&router).await;
                    }
                    _ = retention_tick.tick() => {
                        queue.cleanup_expired().await;
                    }
                }
            }
        })
    }

    async fn update_gauge(&self) {
        let len = self.entries.read().await.len() as i64;
        self.metrics.set_gauge(names::DLQ_ENTRIES, len).await;
    }

    #[cfg(test)]
    async fn force_due(&self, id: Uuid) {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.next_retry_at = Some(Utc::now() - ChronoDuration::seconds(1));
        }
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(duration.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingRouter {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl SignalRouter for FailingRouter {
        async fn route(&self, _signal: &Value) -> McpResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(crate::McpError::internal("downstream unavailable"))
        }
    }

    struct SucceedingRouter;

    #[async_trait]
    impl SignalRouter for SucceedingRouter {
        async fn route(&self, _signal: &Value) -> McpResult<()> {
            Ok(())
        }
    }

    fn queue() -> Arc<DeadLetterQueue> {
        Arc::new(DeadLetterQueue::new(
            DlqConfig::default(),
            MetricsRegistry::new(),
        ))
    }

    #[tokio::test]
    async fn test_new_entry_scheduled_one_base_delay_out() {
        let queue = queue();
        let id = queue.add(json!({"kind": "x"}), "routing_error", "no route").await;

        let entry = queue.get(id).await.unwrap();
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.status(), DlqStatus::Scheduled);

        let delay = entry.next_retry_at.unwrap() - entry.created_at;
        assert_eq!(delay.num_milliseconds(), 1000);
    }

    #[tokio::test]
    async fn test_exponential_backoff_progression() {
        let queue = queue();
        let router: Arc<dyn SignalRouter> = Arc::new(FailingRouter {
            attempts: AtomicU32::new(0),
        });
        let id = queue.add(json!({}), "routing_error", "no route").await;

        // Failure 1: retry_count 1, next delay 2s
        queue.force_due(id).await;
        assert_eq!(queue.process_due(&router).await, 1);
        let entry = queue.get(id).await.unwrap();
        assert_eq!(entry.retry_count, 1);
        let delay = entry.next_retry_at.unwrap() - entry.updated_at;
        assert_eq!(delay.num_milliseconds(), 2000);

        // Failure 2: retry_count 2, next delay 4s
        queue.force_due(id).await;
        queue.process_due(&router).await;
        let entry = queue.get(id).await.unwrap();
        assert_eq!(entry.retry_count, 2);
        let delay = entry.next_retry_at.unwrap() - entry.updated_at;
        assert_eq!(delay.num_milliseconds(), 4000);

        // Failure 3: retries exhausted
        queue.force_due(id).await;
        queue.process_due(&router).await;
        let entry = queue.get(id).await.unwrap();
        assert_eq!(entry.retry_count, 3);
        assert!(entry.next_retry_at.is_none());
        assert_eq!(entry.status(), DlqStatus::Failed);
        assert_eq!(entry.processing_history.len(), 3);

        // Exhausted entries are not picked up again
        assert_eq!(queue.process_due(&router).await, 0);
    }

    #[tokio::test]
    async fn test_backoff_delay_capped() {
        let config = DlqConfig {
            max_retries: 20,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            retention_days: 7,
        };
        let queue = Arc::new(DeadLetterQueue::new(config, MetricsRegistry::new()));
        let router: Arc<dyn SignalRouter> = Arc::new(FailingRouter {
            attempts: AtomicU32::new(0),
        });

        let id = queue.add(json!({}), "routing_error", "no route").await;
        for _ in 0..12 {
            queue.force_due(id).await;
            queue.process_due(&router).await;
        }
        let entry = queue.get(id).await.unwrap();
        let delay = entry.next_retry_at.unwrap() - entry.updated_at;
        assert_eq!(delay.num_milliseconds(), 300_000);
    }

    #[tokio::test]
    async fn test_successful_retry_deletes_entry() {
        let queue = queue();
        let router: Arc<dyn SignalRouter> = Arc::new(SucceedingRouter);
        let id = queue.add(json!({}), "routing_error", "no route").await;

        queue.force_due(id).await;
        queue.process_due(&router).await;
        assert!(queue.get(id).await.is_none());
        assert_eq!(queue.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_manual_retry_ignores_schedule() {
        let queue = queue();
        let router: Arc<dyn SignalRouter> = Arc::new(SucceedingRouter);
        let id = queue.add(json!({}), "routing_error", "no route").await;

        // Not yet due, but manual replay dispatches anyway
        assert!(queue.retry(id, &router).await.unwrap());
        assert!(queue.get(id).await.is_none());

        // Unknown id reports false
        assert!(!queue.retry(Uuid::new_v4(), &router).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let queue = queue();
        let router: Arc<dyn SignalRouter> = Arc::new(FailingRouter {
            attempts: AtomicU32::new(0),
        });

        let exhausted = queue.add(json!({}), "routing_error", "x").await;
        for _ in 0..3 {
            queue.force_due(exhausted).await;
            queue.process_due(&router).await;
        }
        queue.add(json!({}), "timeout", "y").await;

        let failed = queue
            .list(&DlqFilter {
                status: Some(DlqStatus::Failed),
                ..Default::default()
            })
            .await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, exhausted);

        let timeouts = queue
            .list(&DlqFilter {
                error: Some("timeout".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(timeouts.len(), 1);

        let stats = queue.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.scheduled, 1);
    }

    #[tokio::test]
    async fn test_retention_cleanup() {
        let queue = queue();
        let id = queue.add(json!({}), "routing_error", "old").await;
        {
            let mut entries = queue.entries.write().await;
            entries.get_mut(&id).unwrap().created_at = Utc::now() - ChronoDuration::days(8);
        }
        queue.add(json!({}), "routing_error", "fresh").await;

        assert_eq!(queue.cleanup_expired().await, 1);
        assert_eq!(queue.stats().await.total, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = queue();
        queue.add(json!({}), "e", "m").await;
        queue.add(json!({}), "e", "m").await;
        assert_eq!(queue.clear().await, 2);
        assert_eq!(queue.stats().await.total, 0);
    }
}
