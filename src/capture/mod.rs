//! Capture session lifecycle.
//!
//! A [`CaptureCoordinator`] owns one session: the capture thread running the
//! read → forward → dispatch loop, the classification worker pool, and the
//! injected sink. Sessions move through
//! `Idle → Establishing → Running → Stopping → Stopped`; a stopped coordinator
//! cannot be restarted.
//!
//! - [`tunnel`] — frame type, tunnel traits, in-process channel tunnel
//! - `fd_backend` — descriptor-backed tunnel (unix)
//! - [`pipeline`] — capture loop and worker pool

#[cfg(unix)]
pub mod fd_backend;
pub mod pipeline;
pub mod tunnel;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::config::CaptureConfig;
use crate::core::emitter::{EventEmitter, PacketSink};
use crate::core::traffic::{CounterSnapshot, ProtocolStat, ProtocolStats, SessionCounters};
use crate::error::AppError;
use crate::services;

use pipeline::{run_capture_loop, Dispatcher, LoopExit, ReadErrorPolicy, WorkerPool};
use tunnel::{Tunnel, TunnelCloser};

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum CaptureState {
    Idle = 0,
    Establishing = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CaptureState::Idle,
            1 => CaptureState::Establishing,
            2 => CaptureState::Running,
            3 => CaptureState::Stopping,
            _ => CaptureState::Stopped,
        }
    }
}

/// State shared with the capture thread, which moves `Running → Stopping`
/// when the tunnel ends on its own.
#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn get(&self) -> CaptureState {
        CaptureState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: CaptureState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: CaptureState, to: CaptureState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Resources that only exist while a session is live.
struct Session {
    shutdown: Arc<AtomicBool>,
    closer: Arc<dyn TunnelCloser>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
    workers: WorkerPool,
}

/// Owns the capture thread, worker pool, and counters of one session.
/// Implements Drop so an abandoned session still releases the tunnel.
pub struct CaptureCoordinator {
    config: CaptureConfig,
    state: Arc<SharedState>,
    counters: Arc<SessionCounters>,
    protocol_stats: Arc<ProtocolStats>,
    session: Option<Session>,
}

impl CaptureCoordinator {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: Arc::new(SharedState(AtomicU8::new(CaptureState::Idle as u8))),
            counters: Arc::new(SessionCounters::new()),
            protocol_stats: Arc::new(ProtocolStats::new()),
            session: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state.get()
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Running
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn protocol_stats(&self) -> Vec<ProtocolStat> {
        self.protocol_stats.snapshot()
    }

    pub fn clear_protocol_stats(&self) {
        self.protocol_stats.clear();
    }

    /// Start capturing on an already-open tunnel, delivering to `sink`.
    ///
    /// Fails, leaving the coordinator `Idle`, if the configuration is invalid
    /// or the worker pool or capture thread cannot be created. Calling this on
    /// a coordinator that is not `Idle` is an `InvalidInput` error.
    pub fn start<T: Tunnel>(&mut self, tunnel: T, sink: Arc<dyn PacketSink>) -> Result<(), AppError> {
        if !self.state.transition(CaptureState::Idle, CaptureState::Establishing) {
            return Err(AppError::InvalidInput(format!(
                "capture session cannot start from state {:?}",
                self.state()
            )));
        }

        match self.establish(tunnel, sink) {
            Ok(session) => {
                self.session = Some(session);
                tracing::info!(
                    "Capture session running ({} workers)",
                    self.config.worker_threads
                );
                Ok(())
            }
            Err(e) => {
                self.state.set(CaptureState::Idle);
                tracing::error!("Capture session failed to start: {e:#}");
                Err(e.into())
            }
        }
    }

    fn establish<T: Tunnel>(&self, mut tunnel: T, sink: Arc<dyn PacketSink>) -> anyhow::Result<Session> {
        self.config.validate()?;

        let mut workers =
            WorkerPool::new(self.config.worker_threads).context("failed to build worker pool")?;
        let handle = workers
            .handle()
            .context("worker pool shut down during establishment")?;

        let emitter = Arc::new(EventEmitter::new(
            Arc::clone(&sink),
            Arc::clone(&self.counters),
            Arc::clone(&self.protocol_stats),
            self.config.diagnostic_interval_ms,
        ));
        let dispatcher = Dispatcher::new(handle.clone(), emitter);

        let shutdown = Arc::new(AtomicBool::new(false));
        let closer = tunnel.closer();
        let policy = ReadErrorPolicy::from(&self.config);

        // Running must be visible before the thread can observe end of stream.
        self.state.set(CaptureState::Running);

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_state = Arc::clone(&self.state);
        let thread_counters = Arc::clone(&self.counters);
        let spawned = std::thread::Builder::new()
            .name("tunscope-capture".into())
            .spawn(move || {
                let exit = run_capture_loop(
                    &mut tunnel,
                    &dispatcher,
                    &thread_counters,
                    &thread_shutdown,
                    policy,
                );
                match exit {
                    LoopExit::Stopped => tracing::info!("Capture loop stopped"),
                    LoopExit::EndOfStream => tracing::info!("Tunnel reached end of stream"),
                    LoopExit::Fatal(e) => tracing::error!("Capture loop exited: {e}"),
                }
                thread_state.transition(CaptureState::Running, CaptureState::Stopping);
            });

        let capture_thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                workers.shutdown();
                return Err(anyhow::Error::new(e).context("failed to spawn capture thread"));
            }
        };

        if self.config.stats_interval_ms > 0 {
            services::start_stats_reporter(
                &handle,
                Arc::clone(&self.counters),
                sink,
                Duration::from_millis(self.config.stats_interval_ms),
            );
        }

        Ok(Session {
            shutdown,
            closer,
            capture_thread: Some(capture_thread),
            workers,
        })
    }

    /// Stop the session: signal the capture thread, close the tunnel to unblock
    /// its read, join it, and shut the worker pool down without draining.
    /// A no-op unless the session is `Running` or `Stopping`.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.state.set(CaptureState::Stopping);

        session.shutdown.store(true, Ordering::Release);
        session.closer.close();
        if let Some(thread) = session.capture_thread.take() {
            if thread.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
        session.workers.shutdown();

        self.state.set(CaptureState::Stopped);
        let snap = self.counters.snapshot();
        tracing::info!(
            "Capture session stopped: {} frames read, {} packets classified, {} parse failures",
            snap.frames_read,
            snap.packets_seen,
            snap.parse_failures
        );
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        if self.session.is_some() {
            tracing::warn!("CaptureCoordinator dropped while live, stopping session");
            self.stop();
        }
    }
}
