//! Sliding-window counters for security-event threshold alerting

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Metrics tracked by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityMetric {
    AuthFailure,
    RateLimitDenial,
    SecurityEvent,
}

impl SecurityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMetric::AuthFailure => "auth_failure",
            SecurityMetric::RateLimitDenial => "rate_limit_denial",
            SecurityMetric::SecurityEvent => "security_event",
        }
    }
}

/// Bounded sliding-window counter: one bucket per minute, at most
/// `max_buckets` buckets retained per metric.
struct WindowState {
    /// (minute-aligned timestamp, count), oldest first
    buckets: VecDeque<(DateTime<Utc>, u64)>,
}

impl WindowState {
    fn new() -> Self {
        Self {
            buckets: VecDeque::new(),
        }
    }

    fn record(&mut self, now: DateTime<Utc>, max_buckets: usize) {
        let minute = minute_floor(now);
        match self.buckets.back_mut() {
            Some((ts, count)) if *ts == minute => *count += 1,
            _ => self.buckets.push_back((minute, 1)),
        }
        while self.buckets.len() > max_buckets {
            self.buckets.pop_front();
        }
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> u64 {
        self.buckets
            .iter()
            .filter(|(ts, _)| *ts >= minute_floor(cutoff))
            .map(|(_, count)| count)
            .sum()
    }
}

fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::<Utc>::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(ts)
}

/// Alert raised when a metric crosses its threshold within its window
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityAlert {
    pub metric: &'static str,
    pub count: u64,
    pub threshold: u64,
    pub window_minutes: u32,
}

/// Threshold definition
#[derive(Debug, Clone, Copy)]
pub struct AlertThreshold {
    pub threshold: u64,
    pub window_minutes: u32,
}

/// Tracks recent security events in bounded memory and evaluates alert
/// thresholds against them.
pub struct SecurityMonitor {
    windows: RwLock<HashMap<SecurityMetric, WindowState>>,
    thresholds: HashMap<SecurityMetric, AlertThreshold>,
    max_buckets: usize,
}

impl SecurityMonitor {
    pub fn new() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(
            SecurityMetric::AuthFailure,
            AlertThreshold {
                threshold: 20,
                window_minutes: 5,
            },
        );
        thresholds.insert(
            SecurityMetric::RateLimitDenial,
            AlertThreshold {
                threshold: 100,
                window_minutes: 5,
            },
        );
        thresholds.insert(
            SecurityMetric::SecurityEvent,
            AlertThreshold {
                threshold: 10,
                window_minutes: 5,
            },
        );

        Self {
            windows: RwLock::new(HashMap::new()),
            thresholds,
            max_buckets: 60,
        }
    }

    pub fn with_threshold(mut self, metric: SecurityMetric, threshold: AlertThreshold) -> Self {
        self.thresholds.insert(metric, threshold);
        self
    }

    /// Record one occurrence; returns an alert when the metric's
    /// threshold is crossed within its window.
    pub async fn record(&self, metric: SecurityMetric) -> Option<SecurityAlert> {
        let now = Utc::now();
        let mut windows = self.windows.write().await;
        let state = windows.entry(metric).or_insert_with(WindowState::new);
        state.record(now, self.max_buckets);

        let threshold = self.thresholds.get(&metric)?;
        let cutoff = now - Duration::minutes(i64::from(threshold.window_minutes));
        let count = state.count_since(cutoff);

        if count >= threshold.threshold {
            let alert = SecurityAlert {
                metric: metric.as_str(),
                count,
                threshold: threshold.threshold,
                window_minutes: threshold.window_minutes,
            };
            tracing::warn!(
                metric = alert.metric,
                count = alert.count,
                threshold = alert.threshold,
                "Security alert threshold crossed"
            );
            Some(alert)
        } else {
            None
        }
    }

    /// Events recorded for a metric within the trailing window.
    pub async fn count_recent(&self, metric: SecurityMetric, window: Duration) -> u64 {
        let windows = self.windows.read().await;
        windows
            .get(&metric)
            .map(|state| state.count_since(Utc::now() - window))
            .unwrap_or(0)
    }
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_accumulate_within_window() {
        let monitor = SecurityMonitor::new();
        for _ in 0..5 {
            monitor.record(SecurityMetric::AuthFailure).await;
        }
        let count = monitor
            .count_recent(SecurityMetric::AuthFailure, Duration::minutes(5))
            .await;
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_unrecorded_metric_counts_zero() {
        let monitor = SecurityMonitor::new();
        let count = monitor
            .count_recent(SecurityMetric::SecurityEvent, Duration::minutes(5))
            .await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_alert_fires_at_threshold() {
        let monitor = SecurityMonitor::new().with_threshold(
            SecurityMetric::SecurityEvent,
            AlertThreshold {
                threshold: 3,
                window_minutes: 5,
            },
        );

        assert!(monitor.record(SecurityMetric::SecurityEvent).await.is_none());
        assert!(monitor.record(SecurityMetric::SecurityEvent).await.is_none());
        let alert = monitor.record(SecurityMetric::SecurityEvent).await;
        assert!(alert.is_some());
        let alert = alert.unwrap();
        assert_eq!(alert.metric, "security_event");
        assert_eq!(alert.count, 3);
    }

    #[tokio::test]
    async fn test_bucket_count_is_bounded() {
        let monitor = SecurityMonitor::new();
        // Memory stays bounded regardless of event volume
        for _ in 0..10_000 {
            monitor.record(SecurityMetric::RateLimitDenial).await;
        }
        let windows = monitor.windows.read().await;
        let state = windows.get(&SecurityMetric::RateLimitDenial).unwrap();
        assert!(state.buckets.len() <= 60);
    }
}
