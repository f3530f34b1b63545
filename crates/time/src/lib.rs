//! Clock Ports for the ISPC Execution Layer
//!
//! Deterministic execution requires that every timestamp a contract can
//! observe comes from an injected clock. This module provides the `Clock`
//! port and its flavors: the operating-system clock, an offset-corrected
//! clock fed by an external NTP/roughtime synchronizer, and a fixed-epoch
//! deterministic clock for replay and tests.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use ispc_config::{ClockConfig, ClockKind};

/// Nanoseconds per millisecond
pub const NANOS_PER_MILLI: u64 = 1_000_000;
/// Nanoseconds per second
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Clock construction errors
#[derive(Error, Debug)]
pub enum ClockError {
    /// The configured deterministic epoch base does not parse as RFC 3339
    #[error("invalid epoch base {value:?}: {message}")]
    InvalidEpochBase {
        /// The configured value
        value: String,
        /// Parser detail
        message: String,
    },
}

/// A source of nanosecond timestamps.
///
/// Implementations must be cheap to call and safe to share across tasks.
pub trait Clock: Send + Sync {
    /// Current time as nanoseconds since the Unix epoch.
    fn now_ns(&self) -> u64;
}

/// Operating-system wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// A clock corrected by an externally supplied offset.
///
/// The NTP/roughtime synchronizers live outside the execution layer; they
/// push fresh offsets into this clock as their estimates converge.
pub struct OffsetClock {
    inner: Arc<dyn Clock>,
    offset_ns: AtomicI64,
}

impl OffsetClock {
    /// Wraps `inner` with an initial offset in nanoseconds.
    pub fn new(inner: Arc<dyn Clock>, offset_ns: i64) -> Self {
        Self {
            inner,
            offset_ns: AtomicI64::new(offset_ns),
        }
    }

    /// Replaces the correction offset.
    pub fn set_offset_ns(&self, offset_ns: i64) {
        self.offset_ns.store(offset_ns, Ordering::Relaxed);
    }

    /// Current correction offset in nanoseconds.
    pub fn offset_ns(&self) -> i64 {
        self.offset_ns.load(Ordering::Relaxed)
    }
}

impl Clock for OffsetClock {
    fn now_ns(&self) -> u64 {
        let base = self.inner.now_ns();
        let offset = self.offset_ns.load(Ordering::Relaxed);
        if offset >= 0 {
            base.saturating_add(offset as u64)
        } else {
            base.saturating_sub(offset.unsigned_abs())
        }
    }
}

/// A clock pinned to a fixed epoch base.
///
/// `now_ns` returns the base until it is explicitly advanced, so every node
/// configured with the same base observes identical timestamps.
pub struct DeterministicClock {
    base_ns: AtomicU64,
}

impl DeterministicClock {
    /// Creates a clock pinned to `base_ns`.
    pub fn new(base_ns: u64) -> Self {
        Self {
            base_ns: AtomicU64::new(base_ns),
        }
    }

    /// Creates a clock pinned to an RFC 3339 instant.
    pub fn from_rfc3339(value: &str) -> Result<Self, ClockError> {
        let parsed = chrono::DateTime::parse_from_rfc3339(value).map_err(|e| {
            ClockError::InvalidEpochBase {
                value: value.to_string(),
                message: e.to_string(),
            }
        })?;
        let ns = parsed.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        Ok(Self::new(ns))
    }

    /// Moves the clock forward by `delta_ns`.
    pub fn advance_ns(&self, delta_ns: u64) {
        self.base_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    /// Pins the clock to a new instant.
    pub fn set_ns(&self, now_ns: u64) {
        self.base_ns.store(now_ns, Ordering::SeqCst);
    }
}

impl Clock for DeterministicClock {
    fn now_ns(&self) -> u64 {
        self.base_ns.load(Ordering::SeqCst)
    }
}

/// Builds a clock from configuration.
///
/// The ntp and roughtime flavors start at the configured static offset; the
/// owning process is expected to keep the offset fresh through
/// [`OffsetClock::set_offset_ns`].
pub fn clock_from_config(config: &ClockConfig) -> Result<Arc<dyn Clock>, ClockError> {
    match config.kind {
        ClockKind::System => Ok(Arc::new(SystemClock::new())),
        ClockKind::Ntp | ClockKind::Roughtime => Ok(Arc::new(OffsetClock::new(
            Arc::new(SystemClock::new()),
            config.offset_ms.saturating_mul(NANOS_PER_MILLI as i64),
        ))),
        ClockKind::Deterministic => match config.epoch_base.as_deref() {
            Some(raw) => Ok(Arc::new(DeterministicClock::from_rfc3339(raw)?)),
            None => Ok(Arc::new(DeterministicClock::new(0))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn deterministic_clock_stays_pinned() {
        let clock = DeterministicClock::new(42);
        assert_eq!(clock.now_ns(), 42);
        assert_eq!(clock.now_ns(), 42);
        clock.advance_ns(8);
        assert_eq!(clock.now_ns(), 50);
        clock.set_ns(7);
        assert_eq!(clock.now_ns(), 7);
    }

    #[test]
    fn deterministic_clock_parses_rfc3339() {
        let clock = DeterministicClock::from_rfc3339("2025-01-01T00:00:00Z").unwrap();
        assert_eq!(clock.now_ns(), 1_735_689_600 * NANOS_PER_SEC);
        assert!(DeterministicClock::from_rfc3339("not-a-date").is_err());
    }

    #[test]
    fn offset_clock_applies_corrections() {
        let base = Arc::new(DeterministicClock::new(1_000));
        let clock = OffsetClock::new(base.clone(), 500);
        assert_eq!(clock.now_ns(), 1_500);
        clock.set_offset_ns(-250);
        assert_eq!(clock.now_ns(), 750);
        // Corrections never wrap below zero.
        clock.set_offset_ns(-5_000);
        assert_eq!(clock.now_ns(), 0);
    }

    #[test]
    fn clock_from_config_honors_kind() {
        let deterministic = ClockConfig {
            kind: ClockKind::Deterministic,
            epoch_base: Some("2025-01-01T00:00:00Z".to_string()),
            offset_ms: 0,
        };
        let clock = clock_from_config(&deterministic).unwrap();
        assert_eq!(clock.now_ns(), 1_735_689_600 * NANOS_PER_SEC);

        let ntp = ClockConfig {
            kind: ClockKind::Ntp,
            epoch_base: None,
            offset_ms: 0,
        };
        assert!(clock_from_config(&ntp).unwrap().now_ns() > 0);
    }
}
