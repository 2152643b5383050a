//! Hierarchical token-bucket rate limiting
//!
//! Buckets are evaluated global → client → operation. Refill is lazy:
//! each check adds `elapsed * refill_rate` tokens, clamped to
//! `max_tokens + burst_allowance`. Partial consumption is refunded when a
//! lower tier denies, so a denied request never drains the hierarchy.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{BucketConfig, RateLimitConfig};
use crate::{McpError, McpResult};

/// Client priority tier, selecting the client bucket sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientPriority {
    #[default]
    Normal,
    High,
    Critical,
}

/// One token bucket with lazy refill
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    burst_allowance: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &BucketConfig) -> Self {
        Self {
            tokens: config.max_tokens + config.burst,
            max_tokens: config.max_tokens,
            refill_rate: config.refill_rate,
            burst_allowance: config.burst,
            last_refill: Instant::now(),
        }
    }

    fn capacity(&self) -> f64 {
        self.max_tokens + self.burst_allowance
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity());
            self.last_refill = now;
        }
    }

    /// Consume `cost` tokens, or report seconds until they are available.
    fn try_consume(&mut self, cost: f64, now: Instant) -> Result<(), u64> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            Err((deficit / self.refill_rate).ceil() as u64)
        }
    }

    fn refund(&mut self, cost: f64) {
        self.tokens = (self.tokens + cost).min(self.capacity());
    }
}

struct LimiterState {
    global: TokenBucket,
    clients: HashMap<String, TokenBucket>,
    operations: HashMap<String, TokenBucket>,
    priorities: HashMap<String, ClientPriority>,
}

/// Denial detail returned by a failed check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDenial {
    pub scope: &'static str,
    pub retry_after_secs: u64,
}

/// Hierarchical rate limiter with per-client priority tiers
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let global = TokenBucket::new(&config.global);
        Self {
            config,
            state: Mutex::new(LimiterState {
                global,
                clients: HashMap::new(),
                operations: HashMap::new(),
                priorities: HashMap::new(),
            }),
        }
    }

    /// Assign a priority tier to a client. Takes effect for buckets
    /// created after the call.
    pub async fn set_priority(&self, client_id: &str, priority: ClientPriority) {
        self.state
            .lock()
            .await
            .priorities
            .insert(client_id.to_string(), priority);
    }

    /// Check and consume tokens for one operation.
    pub async fn check(&self, client_id: &str, operation: &str) -> McpResult<()> {
        match self.try_acquire(client_id, operation).await {
            Ok(()) => Ok(()),
            Err(denial) => Err(McpError::RateLimited {
                operation: operation.to_string(),
                retry_after_secs: denial.retry_after_secs,
            }),
        }
    }

    /// Check and consume, reporting which tier denied.
    pub async fn try_acquire(
        &self,
        client_id: &str,
        operation: &str,
    ) -> Result<(), RateLimitDenial> {
        let cost = f64::from(self.config.cost_of(operation));
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Err(retry) = state.global.try_consume(cost, now) {
            return Err(RateLimitDenial {
                scope: "global",
                retry_after_secs: retry,
            });
        }

        let priority = state.priorities.get(client_id).copied().unwrap_or_default();
        let client_config = self.bucket_config_for(priority);

        let client_key = client_id.to_string();
        let client_bucket = state
            .clients
            .entry(client_key)
            .or_insert_with(|| TokenBucket::new(client_config));
        if let Err(retry) = client_bucket.try_consume(cost, now) {
            state.global.refund(cost);
            return Err(RateLimitDenial {
                scope: "client",
                retry_after_secs: retry,
            });
        }

        let op_key = format!("{}\u{1f}{}", client_id, operation);
        let op_bucket = state
            .operations
            .entry(op_key)
            .or_insert_with(|| TokenBucket::new(client_config));
        if let Err(retry) = op_bucket.try_consume(cost, now) {
            state.global.refund(cost);
            if let Some(client_bucket) = state.clients.get_mut(client_id) {
                client_bucket.refund(cost);
            }
            return Err(RateLimitDenial {
                scope: "operation",
                retry_after_secs: retry,
            });
        }

        Ok(())
    }

    fn bucket_config_for(&self, priority: ClientPriority) -> &BucketConfig {
        match priority {
            ClientPriority::Normal => &self.config.client.normal,
            ClientPriority::High => &self.config.client.high,
            ClientPriority::Critical => &self.config.client.critical,
        }
    }

    /// Remaining tokens in a client's bucket, for diagnostics.
    pub async fn client_tokens(&self, client_id: &str) -> Option<f64> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.clients.get_mut(client_id).map(|b| {
            b.refill(now);
            b.tokens
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientPriorityConfig;

    fn tight_config(max_tokens: f64, refill_rate: f64, burst: f64) -> RateLimitConfig {
        let bucket = BucketConfig {
            max_tokens,
            refill_rate,
            burst,
        };
        RateLimitConfig {
            global: BucketConfig {
                max_tokens: 1_000_000.0,
                refill_rate: 1_000.0,
                burst: 0.0,
            },
            client: ClientPriorityConfig {
                normal: bucket.clone(),
                high: bucket.clone(),
                critical: bucket,
            },
            operation_costs: crate::config::RateLimitConfig::default().operation_costs,
        }
    }

    #[tokio::test]
    async fn test_sixth_call_denied_with_retry_after() {
        // Bucket sized for exactly five tools/call (cost 5) at 0.1/s refill
        let limiter = RateLimiter::new(tight_config(25.0, 0.1, 0.0));

        for i in 0..5 {
            assert!(
                limiter.try_acquire("client-1", "tools/call").await.is_ok(),
                "call {} should pass",
                i
            );
        }

        let denial = limiter
            .try_acquire("client-1", "tools/call")
            .await
            .unwrap_err();
        // Five tokens short at 0.1 tokens/s
        assert!(denial.retry_after_secs >= 5);
    }

    #[tokio::test]
    async fn test_operation_isolation_between_clients() {
        let limiter = RateLimiter::new(tight_config(5.0, 0.1, 0.0));

        assert!(limiter.try_acquire("a", "tools/call").await.is_ok());
        assert!(limiter.try_acquire("a", "tools/call").await.is_err());
        // Client b has its own buckets
        assert!(limiter.try_acquire("b", "tools/call").await.is_ok());
    }

    #[tokio::test]
    async fn test_refund_on_denial_preserves_global() {
        let limiter = RateLimiter::new(tight_config(5.0, 0.001, 0.0));

        // Drain client a's bucket, then get denied; the global bucket must
        // not leak tokens on the denied attempts.
        assert!(limiter.try_acquire("a", "tools/call").await.is_ok());
        for _ in 0..10 {
            assert!(limiter.try_acquire("a", "tools/call").await.is_err());
        }
        // Another client still has full throughput
        assert!(limiter.try_acquire("b", "tools/call").await.is_ok());
    }

    #[tokio::test]
    async fn test_burst_allowance_extends_capacity() {
        let limiter = RateLimiter::new(tight_config(5.0, 0.001, 5.0));

        // 10 tokens of headroom: two tools/call at cost 5
        assert!(limiter.try_acquire("a", "tools/call").await.is_ok());
        assert!(limiter.try_acquire("a", "tools/call").await.is_ok());
        assert!(limiter.try_acquire("a", "tools/call").await.is_err());
    }

    #[tokio::test]
    async fn test_cheap_operations_cost_less() {
        let limiter = RateLimiter::new(tight_config(5.0, 0.001, 0.0));

        // tools/list costs 1, so five fit where one tools/call would
        for _ in 0..5 {
            assert!(limiter.try_acquire("a", "tools/list").await.is_ok());
        }
        assert!(limiter.try_acquire("a", "tools/list").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_refill_restores_tokens() {
        let limiter = RateLimiter::new(tight_config(5.0, 1.0, 0.0));

        assert!(limiter.try_acquire("a", "tools/call").await.is_ok());
        assert!(limiter.try_acquire("a", "tools/call").await.is_err());

        // 5 seconds at 1 token/s restores a full call
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert!(limiter.try_acquire("a", "tools/call").await.is_ok());
    }

    #[tokio::test]
    async fn test_priority_tiers_select_bucket_size() {
        let mut config = tight_config(5.0, 0.001, 0.0);
        config.client.critical = BucketConfig {
            max_tokens: 50.0,
            refill_rate: 0.001,
            burst: 0.0,
        };
        let limiter = RateLimiter::new(config);
        limiter.set_priority("vip", ClientPriority::Critical).await;

        // Normal client: one call
        assert!(limiter.try_acquire("pleb", "tools/call").await.is_ok());
        assert!(limiter.try_acquire("pleb", "tools/call").await.is_err());

        // Critical client: ten calls
        for _ in 0..10 {
            assert!(limiter.try_acquire("vip", "tools/call").await.is_ok());
        }
        assert!(limiter.try_acquire("vip", "tools/call").await.is_err());
    }
}
