//! Rate limiting for log output.
//!
//! [`DiagnosticRateLimiter`] gates the per-packet diagnostic line: under any
//! number of concurrent callers at most one observes `true` per interval.
//! [`LogThrottle`] wraps a `governor` limiter and keeps failure logs (sink,
//! forward, and read errors) to one line per window.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Sentinel for "no diagnostic emitted yet".
const NEVER: u64 = u64::MAX;

/// Lock-free "once per interval" gate keyed on a caller-supplied clock.
#[derive(Debug)]
pub struct DiagnosticRateLimiter {
    interval_ms: u64,
    last_emit_ms: AtomicU64,
}

impl DiagnosticRateLimiter {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_emit_ms: AtomicU64::new(NEVER),
        }
    }

    /// Returns true for exactly one caller per interval.
    ///
    /// `now_ms` must come from a monotonic clock shared by all callers.
    pub fn should_emit(&self, now_ms: u64) -> bool {
        let last = self.last_emit_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) < self.interval_ms {
            return false;
        }
        if self.interval_ms == 0 {
            self.last_emit_ms.store(now_ms, Ordering::Release);
            return true;
        }
        self.last_emit_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One-permit-per-window throttle for failure logs.
pub struct LogThrottle {
    limiter: DefaultDirectRateLimiter,
}

impl LogThrottle {
    /// A throttle admitting one log line per `window`. A zero window admits
    /// roughly one line per millisecond.
    pub fn new(window: Duration) -> Self {
        let quota = Quota::with_period(window)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1000).unwrap_or(NonZeroU32::MIN)));
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Whether the caller may log now. Never blocks.
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for LogThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogThrottle").finish_non_exhaustive()
    }
}
