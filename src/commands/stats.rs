//! Counter, per-protocol statistics, and export commands.

use crate::core::traffic::{self, CounterSnapshot, ProtocolStat};
use crate::error::AppError;

use super::state::{lock, MonitorState};

/// Counters of the current (or most recent) session.
pub fn get_counters(state: &MonitorState) -> CounterSnapshot {
    lock(&state.coordinator)
        .as_ref()
        .map(|c| c.counters())
        .unwrap_or_default()
}

/// Per-protocol table, busiest label first.
pub fn get_protocol_stats(state: &MonitorState) -> Vec<ProtocolStat> {
    lock(&state.coordinator)
        .as_ref()
        .map(|c| c.protocol_stats())
        .unwrap_or_default()
}

/// Per-protocol table as a JSON array of `{ protocol, packetCount, totalBytes }`.
pub fn get_stats_json(state: &MonitorState) -> Result<String, AppError> {
    Ok(serde_json::to_string(&get_protocol_stats(state))?)
}

/// Reset the per-protocol table. Session counters are left untouched.
pub fn clear_stats(state: &MonitorState) {
    if let Some(coordinator) = lock(&state.coordinator).as_ref() {
        coordinator.clear_protocol_stats();
        tracing::info!("Protocol statistics cleared");
    }
}

/// Plain-text export of the per-protocol table.
pub fn export_summary(state: &MonitorState) -> String {
    traffic::export_summary(&get_protocol_stats(state))
}
