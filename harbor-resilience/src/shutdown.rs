//! Graceful shutdown coordination
//!
//! Two-phase shutdown: a graceful signal lets in-flight work drain, and a
//! force signal fires when the grace period elapses with work remaining.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Shutdown signal broadcast to participating tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Stop accepting new work, let in-flight work complete
    Graceful,
    /// Terminate immediately
    Forced,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Forced => write!(f, "forced"),
        }
    }
}

/// Errors raised while coordinating shutdown
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShutdownError {
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,

    #[error("Shutdown signal could not be delivered")]
    BroadcastError,

    #[error("{0} tasks still active after forced shutdown")]
    TasksRemaining(u32),
}

/// Coordinates graceful shutdown across independent tasks.
///
/// Tasks subscribe for signals and report activity via
/// `task_started`/`task_completed`. `shutdown` broadcasts the graceful
/// signal, waits up to the grace period for the active count to reach
/// zero, then escalates to a forced signal.
pub struct ShutdownCoordinator {
    sender: broadcast::Sender<ShutdownSignal>,
    is_shutting_down: Arc<RwLock<bool>>,
    active_tasks: Arc<RwLock<u32>>,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        let (sender, _) = broadcast::channel(16);

        Self {
            sender,
            is_shutting_down: Arc::new(RwLock::new(false)),
            active_tasks: Arc::new(RwLock::new(0)),
            grace_period,
        }
    }

    /// Subscribe to shutdown signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.sender.subscribe()
    }

    /// Whether shutdown has been initiated.
    pub async fn is_shutting_down(&self) -> bool {
        *self.is_shutting_down.read().await
    }

    /// Record a unit of in-flight work.
    pub async fn task_started(&self) {
        let mut count = self.active_tasks.write().await;
        *count += 1;
    }

    /// Record completion of a unit of in-flight work.
    pub async fn task_completed(&self) {
        let mut count = self.active_tasks.write().await;
        *count = count.saturating_sub(1);
    }

    /// Number of tasks currently in flight.
    pub async fn active_task_count(&self) -> u32 {
        *self.active_tasks.read().await
    }

    /// Initiate shutdown: graceful signal, grace period, forced signal.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        {
            let mut shutting_down = self.is_shutting_down.write().await;
            if *shutting_down {
                return Err(ShutdownError::AlreadyShuttingDown);
            }
            *shutting_down = true;
        }

        info!(grace_secs = self.grace_period.as_secs(), "Starting graceful shutdown");

        // Receivers may already be gone when shutting down an idle server.
        let _ = self.sender.send(ShutdownSignal::Graceful);

        if self.wait_for_tasks(self.grace_period).await {
            info!("Graceful shutdown completed");
            return Ok(());
        }

        warn!("Grace period elapsed, forcing shutdown");
        let _ = self.sender.send(ShutdownSignal::Forced);

        // Brief settling window for forced teardown
        tokio::time::sleep(Duration::from_millis(100)).await;

        let remaining = self.active_task_count().await;
        if remaining > 0 {
            warn!(remaining, "Forced shutdown completed with tasks still active");
            Err(ShutdownError::TasksRemaining(remaining))
        } else {
            Ok(())
        }
    }

    async fn wait_for_tasks(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.active_task_count().await == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_with_no_tasks() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(200));
        assert!(!coordinator.is_shutting_down().await);

        let result = coordinator.shutdown().await;
        assert!(result.is_ok());
        assert!(coordinator.is_shutting_down().await);
    }

    #[tokio::test]
    async fn test_double_shutdown_rejected() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.shutdown().await.unwrap();

        let second = coordinator.shutdown().await;
        assert!(matches!(second, Err(ShutdownError::AlreadyShuttingDown)));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_tasks() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(2)));
        coordinator.task_started().await;

        let worker = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            worker.task_completed().await;
        });

        let result = coordinator.shutdown().await;
        assert!(result.is_ok());
        assert_eq!(coordinator.active_task_count().await, 0);
    }

    #[tokio::test]
    async fn test_forced_shutdown_reports_stuck_tasks() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        coordinator.task_started().await;

        let result = coordinator.shutdown().await;
        assert!(matches!(result, Err(ShutdownError::TasksRemaining(1))));
    }

    #[tokio::test]
    async fn test_subscribers_receive_graceful_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let mut rx = coordinator.subscribe();

        coordinator.shutdown().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
    }
}
