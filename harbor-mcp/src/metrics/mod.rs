//! Counter and gauge emission points consumed by exporters

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Well-known metric names
pub mod names {
    pub const REQUESTS_TOTAL: &str = "requests_total";
    pub const REQUESTS_FAILED: &str = "requests_failed";
    pub const REQUESTS_TIMED_OUT: &str = "requests_timed_out";
    pub const SESSIONS_ACTIVE: &str = "sessions_active";
    pub const SESSIONS_REFUSED: &str = "sessions_refused";
    pub const RATE_LIMIT_DENIALS: &str = "rate_limit_denials";
    pub const AUTH_FAILURES: &str = "auth_failures";
    pub const WORKFLOW_EXECUTIONS: &str = "workflow_executions";
    pub const WORKFLOW_FAILURES: &str = "workflow_failures";
    pub const DLQ_ENTRIES: &str = "dlq_entries";
    pub const DLQ_RETRIES: &str = "dlq_retries";
    pub const DELIVERIES_ACKED: &str = "deliveries_acked";
    pub const DELIVERIES_FAILED: &str = "deliveries_failed";
    pub const NOTIFICATIONS_SENT: &str = "notifications_sent";
}

/// Point-in-time export of all metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, i64>,
}

/// Registry of atomic counters and gauges. Cloning shares the cells.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<HashMap<String, Arc<AtomicU64>>>>,
    gauges: Arc<RwLock<HashMap<String, Arc<AtomicI64>>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub async fn incr(&self, name: &str) {
        self.incr_by(name, 1).await;
    }

    /// Increment a counter.
    pub async fn incr_by(&self, name: &str, delta: u64) {
        let cell = {
            let counters = self.counters.read().await;
            counters.get(name).cloned()
        };
        match cell {
            Some(cell) => {
                cell.fetch_add(delta, Ordering::Relaxed);
            }
            None => {
                let mut counters = self.counters.write().await;
                counters
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(AtomicU64::new(0)))
                    .fetch_add(delta, Ordering::Relaxed);
            }
        }
    }

    /// Set a gauge to an absolute value.
    pub async fn set_gauge(&self, name: &str, value: i64) {
        let cell = {
            let gauges = self.gauges.read().await;
            gauges.get(name).cloned()
        };
        match cell {
            Some(cell) => cell.store(value, Ordering::Relaxed),
            None => {
                let mut gauges = self.gauges.write().await;
                gauges
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(AtomicI64::new(0)))
                    .store(value, Ordering::Relaxed);
            }
        }
    }

    /// Adjust a gauge by a delta.
    pub async fn add_gauge(&self, name: &str, delta: i64) {
        let cell = {
            let gauges = self.gauges.read().await;
            gauges.get(name).cloned()
        };
        match cell {
            Some(cell) => {
                cell.fetch_add(delta, Ordering::Relaxed);
            }
            None => {
                let mut gauges = self.gauges.write().await;
                gauges
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(AtomicI64::new(0)))
                    .fetch_add(delta, Ordering::Relaxed);
            }
        }
    }

    /// Current value of a counter.
    pub async fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .await
            .get(name)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current value of a gauge.
    pub async fn gauge(&self, name: &str) -> i64 {
        self.gauges
            .read()
            .await
            .get(name)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Export everything for an exporter.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .await
            .iter()
            .map(|(name, cell)| (name.clone(), cell.load(Ordering::Relaxed)))
            .collect();
        let gauges = self
            .gauges
            .read()
            .await
            .iter()
            .map(|(name, cell)| (name.clone(), cell.load(Ordering::Relaxed)))
            .collect();
        MetricsSnapshot { counters, gauges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.incr(names::REQUESTS_TOTAL).await;
        metrics.incr(names::REQUESTS_TOTAL).await;
        metrics.incr_by(names::REQUESTS_TOTAL, 3).await;
        assert_eq!(metrics.counter(names::REQUESTS_TOTAL).await, 5);
        assert_eq!(metrics.counter(names::REQUESTS_FAILED).await, 0);
    }

    #[tokio::test]
    async fn test_gauges_set_and_adjust() {
        let metrics = MetricsRegistry::new();
        metrics.set_gauge(names::SESSIONS_ACTIVE, 3).await;
        metrics.add_gauge(names::SESSIONS_ACTIVE, -1).await;
        assert_eq!(metrics.gauge(names::SESSIONS_ACTIVE).await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_contains_everything() {
        let metrics = MetricsRegistry::new();
        metrics.incr(names::WORKFLOW_EXECUTIONS).await;
        metrics.set_gauge(names::DLQ_ENTRIES, 7).await;

        let snapshot = metrics.snapshot().await;
        assert_eq!(snapshot.counters[names::WORKFLOW_EXECUTIONS], 1);
        assert_eq!(snapshot.gauges[names::DLQ_ENTRIES], 7);
    }

    #[tokio::test]
    async fn test_clone_shares_cells() {
        let metrics = MetricsRegistry::new();
        let clone = metrics.clone();
        clone.incr(names::REQUESTS_TOTAL).await;
        assert_eq!(metrics.counter(names::REQUESTS_TOTAL).await, 1);
    }
}
