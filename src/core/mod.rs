//! Core logic: header parsing, classification, accounting, emission.
//!
//! - [`header`] — IPv4 header discovery inside raw tunnel frames
//! - [`classifier`] — transport ports and protocol/service labels
//! - [`rate_limiter`] — diagnostic gate and failure-log throttle
//! - [`traffic`] — session counters and per-protocol statistics
//! - [`emitter`] — sink delivery of classified packets

pub mod classifier;
pub mod emitter;
pub mod header;
pub mod rate_limiter;
pub mod traffic;

pub use classifier::{ClassifiedPacket, ProtocolLabel, TransportPorts};
pub use emitter::{ChannelSink, EmitOutcome, EventEmitter, PacketSink, SinkEvent};
pub use header::Ipv4Header;
pub use rate_limiter::{DiagnosticRateLimiter, LogThrottle};
pub use traffic::{CounterSnapshot, ProtocolStat, ProtocolStats, SessionCounters};
