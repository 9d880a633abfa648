//! Session start/stop and status commands.

use std::sync::Arc;

use crate::capture::tunnel::Tunnel;
use crate::capture::{CaptureCoordinator, CaptureState};
use crate::config::CaptureConfig;
use crate::core::emitter::PacketSink;
use crate::error::AppError;

use super::state::{lock, MonitorState};

/// Start a new session on an already-open tunnel.
///
/// Fails with `InvalidInput` while a session is establishing or running. A
/// session that already ended is finalized and replaced; if the new session
/// fails to start, the previous one (and its counters) is kept.
pub fn start_capture<T: Tunnel>(
    state: &MonitorState,
    tunnel: T,
    sink: Arc<dyn PacketSink>,
) -> Result<(), AppError> {
    let mut current = lock(&state.coordinator);
    if let Some(coordinator) = current.as_mut() {
        match coordinator.state() {
            CaptureState::Establishing | CaptureState::Running => {
                return Err(AppError::InvalidInput("Capture already running".into()));
            }
            _ => coordinator.stop(),
        }
    }

    let config = lock(&state.config).clone();
    let mut fresh = CaptureCoordinator::new(config);
    fresh.start(tunnel, sink)?;
    *current = Some(fresh);
    Ok(())
}

/// Start a session on a raw tunnel descriptor handed over by the host.
#[cfg(unix)]
pub fn start_fd_capture(
    state: &MonitorState,
    fd: std::os::fd::OwnedFd,
    sink: Arc<dyn PacketSink>,
) -> Result<(), AppError> {
    let tunnel = crate::capture::fd_backend::FdTunnel::new(fd)?;
    start_capture(state, tunnel, sink)
}

/// Stop the current session. A no-op when nothing is running.
pub fn stop_capture(state: &MonitorState) -> Result<(), AppError> {
    if let Some(coordinator) = lock(&state.coordinator).as_mut() {
        coordinator.stop();
        tracing::info!("Capture stopped by host");
    }
    Ok(())
}

pub fn is_capturing(state: &MonitorState) -> bool {
    lock(&state.coordinator)
        .as_ref()
        .map_or(false, CaptureCoordinator::is_capturing)
}

/// State of the current session, `Idle` if none was ever started.
pub fn capture_state(state: &MonitorState) -> CaptureState {
    lock(&state.coordinator)
        .as_ref()
        .map_or(CaptureState::Idle, CaptureCoordinator::state)
}

/// Replace the configuration used by the next session from a JSON object.
pub fn set_config(state: &MonitorState, json: &str) -> Result<(), AppError> {
    let config = CaptureConfig::from_json(json)?;
    tracing::info!("Capture config updated: {config:?}");
    *lock(&state.config) = config;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tunnel::ChannelTunnel;
    use crate::core::emitter::ChannelSink;

    fn state() -> MonitorState {
        MonitorState::new(CaptureConfig {
            worker_threads: 1,
            stats_interval_ms: 0,
            ..CaptureConfig::default()
        })
    }

    #[test]
    fn test_idle_before_first_start() {
        let state = state();
        assert!(!is_capturing(&state));
        assert_eq!(capture_state(&state), CaptureState::Idle);
        assert!(stop_capture(&state).is_ok());
    }

    #[test]
    fn test_start_twice_rejected_then_restart_after_stop() {
        let state = state();
        let (sink, _events) = ChannelSink::new();

        let (tunnel, _frames, _fwd) = ChannelTunnel::new();
        start_capture(&state, tunnel, Arc::new(sink.clone())).unwrap();
        assert!(is_capturing(&state));

        let (tunnel, _f2, _o2) = ChannelTunnel::new();
        let err = start_capture(&state, tunnel, Arc::new(sink.clone())).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");

        stop_capture(&state).unwrap();
        assert_eq!(capture_state(&state), CaptureState::Stopped);

        let (tunnel, _f3, _o3) = ChannelTunnel::new();
        start_capture(&state, tunnel, Arc::new(sink)).unwrap();
        assert_eq!(capture_state(&state), CaptureState::Running);
        stop_capture(&state).unwrap();
    }

    #[test]
    fn test_failed_start_keeps_previous_session() {
        let state = state();
        let (sink, _events) = ChannelSink::new();
        let (tunnel, _frames, _fwd) = ChannelTunnel::new();
        start_capture(&state, tunnel, Arc::new(sink.clone())).unwrap();
        stop_capture(&state).unwrap();

        // Bypass set_config validation to force an establishment failure.
        lock(&state.config).worker_threads = 0;
        let (tunnel, _f2, _o2) = ChannelTunnel::new();
        let err = start_capture(&state, tunnel, Arc::new(sink)).unwrap_err();
        assert_eq!(err.kind(), "Capture");
        assert_eq!(capture_state(&state), CaptureState::Stopped);
    }

    #[test]
    fn test_set_config_validates() {
        let state = state();
        assert!(set_config(&state, r#"{ "diagnosticIntervalMs": 250 }"#).is_ok());
        assert_eq!(lock(&state.config).diagnostic_interval_ms, 250);

        let err = set_config(&state, r#"{ "workerThreads": 0 }"#).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
        assert_eq!(lock(&state.config).diagnostic_interval_ms, 250);
    }
}
