//! Host control surface, organized by concern.
//!
//! These are the calls a hosting process (VPN service, desktop shell, CLI)
//! makes against the engine. They take plain parameters plus a shared
//! [`MonitorState`] and return [`AppError`](crate::error::AppError) on failure.
//!
//! - `capture`: session start/stop and status
//! - `stats`: counters, per-protocol table, clear, export
//! - `state`: shared `MonitorState` definition

pub(crate) mod capture;
mod state;
pub(crate) mod stats;

pub use capture::{capture_state, is_capturing, set_config, start_capture, stop_capture};
#[cfg(unix)]
pub use capture::start_fd_capture;
pub use state::MonitorState;
pub use stats::{clear_stats, export_summary, get_counters, get_protocol_stats, get_stats_json};
