//! Resilience primitives shared across the Harbor workspace.
//!
//! Provides backoff-delay calculation for retry schedules (dead-letter
//! queue, message delivery) and a graceful-shutdown coordinator used by
//! the MCP server core.

pub mod backoff;
pub mod shutdown;

pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use shutdown::{ShutdownCoordinator, ShutdownError, ShutdownSignal};
