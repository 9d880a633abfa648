//! Tunnel traffic observer.
//!
//! Reads raw IPv4 frames from a virtual interface, writes every frame straight
//! back unmodified, and classifies a copy of each on a worker pool: endpoints,
//! ports, and a protocol/service label, delivered to a host-supplied
//! [`PacketSink`](crate::core::PacketSink) together with running counters.

pub mod capture;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod services;

pub use capture::tunnel::{ChannelTunnel, PacketForwarder, RawFrame, Tunnel, TunnelRead, TunnelReader};
pub use capture::{CaptureCoordinator, CaptureState};
pub use commands::MonitorState;
pub use config::CaptureConfig;
pub use crate::core::{ChannelSink, ClassifiedPacket, CounterSnapshot, PacketSink, ProtocolLabel, SinkEvent};
pub use error::{AppError, ParseError};

#[cfg(unix)]
pub use capture::fd_backend::FdTunnel;

/// Install the global `tracing` subscriber. Honors `RUST_LOG`, defaulting to
/// `tunscope=info`. Later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunscope=info".into()),
        )
        .try_init();
}

/// Route panics through `tracing` before the default hook runs.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in tunscope: {info}");
        default_hook(info);
    }));
}
