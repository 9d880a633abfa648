//! Centralized runtime constants and the capture session configuration.
//!
//! All tunable intervals, thresholds, and sizes are collected here so they can
//! be found and adjusted in a single place rather than scattered across modules.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Largest frame classified by the engine (bytes).
pub const MTU: usize = 1500;

/// Read buffer size for descriptor tunnels: the largest IPv4 datagram, so a
/// frame above the MTU is still read whole and passed through untruncated.
pub const MAX_READ_LEN: usize = 65_535;

/// Size of an IPv4 header without options (bytes).
pub const MIN_IPV4_HEADER_LEN: usize = 20;

/// Highest offset probed when searching for the IPv4 version byte.
/// Some tunnel implementations prepend a few encapsulation bytes.
pub const MAX_HEADER_SCAN_OFFSET: usize = 10;

/// Minimum spacing between two per-packet diagnostic log lines (milliseconds).
pub const DIAGNOSTIC_INTERVAL_MS: u64 = 1000;

/// Interval at which the stats reporter pushes counters to the sink (milliseconds).
pub const STATS_INTERVAL_MS: u64 = 1000;

/// Pause after a transient tunnel read error before retrying (milliseconds).
pub const READ_ERROR_BACKOFF_MS: u64 = 100;

/// Consecutive read failures after which the descriptor is considered dead.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 32;

/// Minimum spacing between two failure log lines of the same kind (milliseconds).
pub const FAILURE_LOG_INTERVAL_MS: u64 = 1000;

/// Upper bound on the default worker pool size.
pub const MAX_DEFAULT_WORKERS: usize = 4;

/// Per-session settings supplied by the host when starting a capture.
///
/// Every field has a default, so a host may pass a partial JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Spacing of the rate-limited diagnostic line. `0` logs every packet.
    pub diagnostic_interval_ms: u64,
    /// Spacing of `PacketSink::on_stats` callbacks. `0` disables them.
    pub stats_interval_ms: u64,
    /// Number of classification worker threads.
    pub worker_threads: usize,
    pub read_error_backoff_ms: u64,
    pub max_consecutive_read_errors: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, MAX_DEFAULT_WORKERS);
        Self {
            diagnostic_interval_ms: DIAGNOSTIC_INTERVAL_MS,
            stats_interval_ms: STATS_INTERVAL_MS,
            worker_threads: workers,
            read_error_backoff_ms: READ_ERROR_BACKOFF_MS,
            max_consecutive_read_errors: MAX_CONSECUTIVE_READ_ERRORS,
        }
    }
}

impl CaptureConfig {
    /// Parse a (possibly partial) JSON object and validate it.
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.worker_threads == 0 {
            return Err(AppError::InvalidInput(
                "workerThreads must be at least 1".into(),
            ));
        }
        if self.max_consecutive_read_errors == 0 {
            return Err(AppError::InvalidInput(
                "maxConsecutiveReadErrors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
