//! Shared monitor state held by the host.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::capture::CaptureCoordinator;
use crate::config::CaptureConfig;

/// Shared monitor state. Locks are only taken on the control path, never by
/// the capture thread or the workers.
#[derive(Default)]
pub struct MonitorState {
    /// Configuration applied to the next session.
    pub(crate) config: Mutex<CaptureConfig>,
    /// Current or most recent session; kept after stop so its counters stay readable.
    pub(crate) coordinator: Mutex<Option<CaptureCoordinator>>,
}

impl MonitorState {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config: Mutex::new(config),
            coordinator: Mutex::new(None),
        }
    }
}

/// Lock a control-path mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
