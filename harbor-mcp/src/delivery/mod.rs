//! At-least-once message delivery for connection-oriented transports
//!
//! Every outbound message gets a delivery id and stays queued until the
//! client acknowledges it. Failure reports requeue with backoff up to the
//! configured attempt ceiling, after which the message moves to the
//! dead-letter queue.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::dlq::DeadLetterQueue;
use crate::metrics::{names, MetricsRegistry};
use crate::McpResult;
use harbor_resilience::BackoffCalculator;

/// Delivery priority; higher drains first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DeliveryPriority {
    #[default]
    Normal,
    High,
    Critical,
}

/// One queued outbound message
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub id: Uuid,
    pub connection_id: String,
    pub message: String,
    pub priority: DeliveryPriority,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Delivery-layer statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    pub enqueued: u64,
    pub acknowledged: u64,
    pub failures_reported: u64,
    pub moved_to_dlq: u64,
    pub pending: usize,
}

pub struct DeliveryQueue {
    config: DeliveryConfig,
    backoff: BackoffCalculator,
    pending: RwLock<HashMap<Uuid, PendingDelivery>>,
    dlq: Arc<DeadLetterQueue>,
    metrics: MetricsRegistry,
    stats: RwLock<DeliveryStats>,
}

impl DeliveryQueue {
    pub fn new(
        config: DeliveryConfig,
        dlq: Arc<DeadLetterQueue>,
        metrics: MetricsRegistry,
    ) -> Self {
        let backoff = BackoffCalculator::exponential(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        );
        Self {
            config,
            backoff,
            pending: RwLock::new(HashMap::new()),
            dlq,
            metrics,
            stats: RwLock::new(DeliveryStats::default()),
        }
    }

    /// Queue a message for delivery. It stays queued until acknowledged.
    pub async fn enqueue(
        &self,
        connection_id: &str,
        message: String,
        priority: DeliveryPriority,
    ) -> Uuid {
        let now = Utc::now();
        let delivery = PendingDelivery {
            id: Uuid::new_v4(),
            connection_id: connection_id.to_string(),
            message,
            priority,
            attempts: 0,
            next_attempt_at: now,
            created_at: now,
            last_error: None,
        };
        let id = delivery.id;

        self.pending.write().await.insert(id, delivery);
        self.stats.write().await.enqueued += 1;
        id
    }

    /// Client acknowledged receipt; the message leaves the queue.
    pub async fn acknowledge(&self, id: Uuid) -> bool {
        let removed = self.pending.write().await.remove(&id).is_some();
        if removed {
            self.stats.write().await.acknowledged += 1;
            self.metrics.incr(names::DELIVERIES_ACKED).await;
        }
        removed
    }

    /// Client (or transport) reported a delivery failure. Requeues with
    /// backoff until the attempt ceiling, then dead-letters the message.
    pub async fn report_delivery_failure(&self, id: Uuid, reason: &str) -> bool {
        let exhausted = {
            let mut pending = self.pending.write().await;
            let Some(delivery) = pending.get_mut(&id) else {
                return false;
            };
            delivery.attempts += 1;
            delivery.last_error = Some(reason.to_string());
            if delivery.attempts >= self.config.max_attempts {
                pending.remove(&id)
            } else {
                let delay = self.backoff.delay_for_attempt(delivery.attempts - 1);
                delivery.next_attempt_at =
                    Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
                None
            }
        };

        self.stats.write().await.failures_reported += 1;
        self.metrics.incr(names::DELIVERIES_FAILED).await;

        if let Some(delivery) = exhausted {
            tracing::warn!(
                delivery_id = %id,
                connection_id = %delivery.connection_id,
                attempts = delivery.attempts,
                "Delivery attempts exhausted, moving to DLQ"
            );
            self.dlq
                .add(
                    serde_json::json!({
                        "kind": "undeliverable_message",
                        "connectionId": delivery.connection_id,
                        "message": delivery.message,
                        "priority": format!("{:?}", delivery.priority),
                    }),
                    "delivery_failed",
                    reason,
                )
                .await;
            self.stats.write().await.moved_to_dlq += 1;
        }
        true
    }

    /// Deliveries whose attempt time has come, critical first, oldest
    /// first within a tier.
    pub async fn due_deliveries(&self) -> Vec<PendingDelivery> {
        let now = Utc::now();
        let mut due: Vec<PendingDelivery> = self
            .pending
            .read()
            .await
            .values()
            .filter(|d| d.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        due
    }

    /// Push every due delivery through the sender. Sent messages remain
    /// queued (at-least-once) with their next attempt pushed out; send
    /// errors count as failure reports.
    pub async fn flush<S, Fut>(&self, send: S) -> usize
    where
        S: Fn(String, String) -> Fut,
        Fut: Future<Output = McpResult<()>>,
    {
        let due = self.due_deliveries().await;
        let mut sent = 0;

        for delivery in due {
            match send(delivery.connection_id.clone(), delivery.message.clone()).await {
                Ok(()) => {
                    sent += 1;
                    let mut pending = self.pending.write().await;
                    if let Some(entry) = pending.get_mut(&delivery.id) {
                        let delay = self.backoff.delay_for_attempt(entry.attempts);
                        entry.next_attempt_at =
                            Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
                    }
                }
                Err(e) => {
                    self.report_delivery_failure(delivery.id, &e.to_string()).await;
                }
            }
        }
        sent
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn stats(&self) -> DeliveryStats {
        let mut stats = self.stats.read().await.clone();
        stats.pending = self.pending.read().await.len();
        stats
    }

    #[cfg(test)]
    async fn force_due(&self, id: Uuid) {
        if let Some(entry) = self.pending.write().await.get_mut(&id) {
            entry.next_attempt_at = Utc::now() - ChronoDuration::seconds(1);
        }
    }
}
