//! The read → forward → dispatch loop and the classification worker pool.
//!
//! Forwarding happens synchronously on the capture thread in read order.
//! Classification is handed to the worker pool and may complete out of order.
//! Nothing on the classification side can block or fail the capture thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::capture::tunnel::{RawFrame, Tunnel, TunnelRead};
use crate::config::{CaptureConfig, FAILURE_LOG_INTERVAL_MS};
use crate::core::emitter::{EmitOutcome, EventEmitter};
use crate::core::rate_limiter::LogThrottle;
use crate::core::traffic::SessionCounters;

/// Classification worker pool backed by a dedicated multi-thread runtime.
pub struct WorkerPool {
    runtime: Option<tokio::runtime::Runtime>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("tunscope-worker")
            .enable_time()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Handle for spawning onto the pool. `None` once shut down.
    pub fn handle(&self) -> Option<tokio::runtime::Handle> {
        self.runtime.as_ref().map(|rt| rt.handle().clone())
    }

    /// Stop the pool without waiting for queued tasks. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::debug!("Worker pool shut down");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Fire-and-forget submission of frames to the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    handle: tokio::runtime::Handle,
    emitter: Arc<EventEmitter>,
}

impl Dispatcher {
    pub fn new(handle: tokio::runtime::Handle, emitter: Arc<EventEmitter>) -> Self {
        Self { handle, emitter }
    }

    /// Queue `frame` for classification. The capture loop drops the handle;
    /// awaiting it yields what the emitter did with the frame.
    pub fn dispatch(&self, frame: RawFrame) -> JoinHandle<Option<EmitOutcome>> {
        let emitter = Arc::clone(&self.emitter);
        self.handle
            .spawn(async move { emitter.process_frame(frame.as_bytes()) })
    }
}

/// Read-error handling knobs, taken from [`CaptureConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ReadErrorPolicy {
    pub backoff: Duration,
    pub max_consecutive: u32,
}

impl From<&CaptureConfig> for ReadErrorPolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            backoff: Duration::from_millis(config.read_error_backoff_ms),
            max_consecutive: config.max_consecutive_read_errors,
        }
    }
}

/// Why the capture loop returned.
#[derive(Debug)]
pub enum LoopExit {
    /// The stop flag was observed.
    Stopped,
    /// The tunnel reported end of stream on its own.
    EndOfStream,
    /// The descriptor is closed, invalid, or kept failing.
    Fatal(io::Error),
}

/// Errors meaning the descriptor itself is gone rather than a hiccup.
pub fn is_fatal_read_error(err: &io::Error) -> bool {
    is_bad_descriptor(err)
        || matches!(
            err.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::UnexpectedEof
        )
}

#[cfg(unix)]
fn is_bad_descriptor(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EBADF as i32)
}

#[cfg(not(unix))]
fn is_bad_descriptor(_err: &io::Error) -> bool {
    false
}

/// Main capture loop running on the dedicated capture thread.
pub fn run_capture_loop<T: Tunnel>(
    tunnel: &mut T,
    dispatcher: &Dispatcher,
    counters: &SessionCounters,
    shutdown: &AtomicBool,
    policy: ReadErrorPolicy,
) -> LoopExit {
    let forward_log = LogThrottle::new(Duration::from_millis(FAILURE_LOG_INTERVAL_MS));
    let read_log = LogThrottle::new(Duration::from_millis(FAILURE_LOG_INTERVAL_MS));
    let oversized_log = LogThrottle::new(Duration::from_millis(FAILURE_LOG_INTERVAL_MS));
    let mut consecutive_errors = 0u32;

    loop {
        if shutdown.load(Ordering::Acquire) {
            return LoopExit::Stopped;
        }

        match tunnel.read() {
            Ok(TunnelRead::Frame(frame)) => {
                consecutive_errors = 0;
                counters.record_frame_read();
                forward_frame(tunnel, frame.as_bytes(), counters, &forward_log);
                dispatcher.dispatch(frame);
            }
            Ok(TunnelRead::Oversized(bytes)) => {
                consecutive_errors = 0;
                counters.record_frame_read();
                counters.record_oversized();
                if oversized_log.allow() {
                    tracing::warn!("Passing through {}-byte frame above MTU unclassified", bytes.len());
                }
                forward_frame(tunnel, &bytes, counters, &forward_log);
            }
            Ok(TunnelRead::EndOfStream) => {
                return if shutdown.load(Ordering::Acquire) {
                    LoopExit::Stopped
                } else {
                    LoopExit::EndOfStream
                };
            }
            Err(e) => {
                if shutdown.load(Ordering::Acquire) {
                    return LoopExit::Stopped;
                }
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                if is_fatal_read_error(&e) {
                    return LoopExit::Fatal(e);
                }
                consecutive_errors += 1;
                if consecutive_errors >= policy.max_consecutive {
                    tracing::error!("Giving up after {consecutive_errors} consecutive read errors");
                    return LoopExit::Fatal(e);
                }
                if read_log.allow() {
                    tracing::warn!("Tunnel read error ({consecutive_errors} in a row): {e}");
                }
                std::thread::sleep(policy.backoff);
            }
        }
    }
}

/// Write one frame back to the tunnel, counting the outcome.
fn forward_frame<T: Tunnel>(
    tunnel: &mut T,
    bytes: &[u8],
    counters: &SessionCounters,
    forward_log: &LogThrottle,
) {
    let forwarded = tunnel.forward(bytes);
    if let Err(e) = &forwarded {
        if forward_log.allow() {
            tracing::warn!("Failed to forward {}-byte frame: {e}", bytes.len());
        }
    }
    counters.record_forward(forwarded.is_ok());
}
