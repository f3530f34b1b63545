//! Graceful shutdown handling.
//!
//! Components that own background tasks implement [`Shutdown`]; the process
//! coordinator walks them in dependency order. Shutdown must drain in-flight
//! work without loss, but never hang: past the grace timeout components force
//! their way down with a warning.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Maximum time to wait for in-flight work to drain.
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between drain re-checks while shutting down.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Component that can be shut down gracefully.
#[async_trait]
pub trait Shutdown: Send + Sync {
    /// Component name for logging.
    fn name(&self) -> &str;

    /// Drains in-flight work and releases resources.
    async fn shutdown(&self) -> Result<()>;
}
