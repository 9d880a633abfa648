//! Delivery of classified packets to the host sink.
//!
//! Every classified packet updates the session counters and reaches the sink.
//! Only the human-readable diagnostic line is rate limited. Sink failures are
//! counted and logged through a throttle; they never propagate to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::classifier::{self, ClassifiedPacket};
use crate::core::header;
use crate::core::rate_limiter::{DiagnosticRateLimiter, LogThrottle};
use crate::core::traffic::{format_bytes_compact, CounterSnapshot, ProtocolStats, SessionCounters};

/// Consumer of classified packets and periodic counter snapshots.
///
/// Implementations are called from worker threads and must not block for long.
pub trait PacketSink: Send + Sync {
    fn on_packet(&self, packet: &ClassifiedPacket) -> anyhow::Result<()>;

    fn on_stats(&self, _stats: &CounterSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Event forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Packet(ClassifiedPacket),
    Stats(CounterSnapshot),
}

/// Sink that pushes events into an unbounded tokio channel.
///
/// Delivery fails once the receiving half is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PacketSink for ChannelSink {
    fn on_packet(&self, packet: &ClassifiedPacket) -> anyhow::Result<()> {
        self.tx
            .send(SinkEvent::Packet(packet.clone()))
            .map_err(|_| anyhow::anyhow!("packet receiver dropped"))
    }

    fn on_stats(&self, stats: &CounterSnapshot) -> anyhow::Result<()> {
        self.tx
            .send(SinkEvent::Stats(*stats))
            .map_err(|_| anyhow::anyhow!("stats receiver dropped"))
    }
}

/// What happened to one emitted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitOutcome {
    pub delivered: bool,
    pub diagnostic_logged: bool,
    /// A failed delivery was logged rather than suppressed by the throttle.
    pub failure_logged: bool,
}

/// Shared per-session emitter. One instance serves every worker.
pub struct EventEmitter {
    sink: Arc<dyn PacketSink>,
    counters: Arc<SessionCounters>,
    protocol_stats: Arc<ProtocolStats>,
    diagnostics: DiagnosticRateLimiter,
    sink_failure_log: LogThrottle,
    epoch: Instant,
}

impl EventEmitter {
    pub fn new(
        sink: Arc<dyn PacketSink>,
        counters: Arc<SessionCounters>,
        protocol_stats: Arc<ProtocolStats>,
        diagnostic_interval_ms: u64,
    ) -> Self {
        Self {
            sink,
            counters,
            protocol_stats,
            diagnostics: DiagnosticRateLimiter::new(diagnostic_interval_ms),
            sink_failure_log: LogThrottle::new(Duration::from_millis(diagnostic_interval_ms)),
            epoch: Instant::now(),
        }
    }

    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    pub fn sink(&self) -> &Arc<dyn PacketSink> {
        &self.sink
    }

    /// Count, deliver, and maybe log one classified packet.
    pub fn emit(&self, packet: &ClassifiedPacket) -> EmitOutcome {
        self.counters.record_packet(packet.size_bytes as u64);
        self.protocol_stats.record(packet.protocol, packet.size_bytes as u64);

        let mut failure_logged = false;
        let delivered = match self.sink.on_packet(packet) {
            Ok(()) => true,
            Err(e) => {
                self.counters.record_sink_failure();
                if self.sink_failure_log.allow() {
                    tracing::warn!("Failed to deliver packet to sink: {e:#}");
                    failure_logged = true;
                }
                false
            }
        };

        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let diagnostic_logged = self.diagnostics.should_emit(now_ms);
        if diagnostic_logged {
            tracing::info!(
                "Packet: {}:{} -> {}:{} ({}, {}B) | total {} packets, {}",
                packet.source_ip,
                packet.source_port,
                packet.dest_ip,
                packet.dest_port,
                packet.protocol,
                packet.size_bytes,
                self.counters.packets_seen(),
                format_bytes_compact(self.counters.bytes_seen()),
            );
        }

        EmitOutcome {
            delivered,
            diagnostic_logged,
            failure_logged,
        }
    }

    /// Run header discovery, classification, and emission for one frame.
    ///
    /// Frames that are not IPv4 are counted as parse failures and dropped from
    /// classification; they have already been forwarded by the capture thread.
    pub fn process_frame(&self, frame: &[u8]) -> Option<EmitOutcome> {
        match header::locate(frame) {
            Ok(ip) => {
                let packet = classifier::classify(frame, &ip);
                Some(self.emit(&packet))
            }
            Err(e) => {
                self.counters.record_parse_failure();
                tracing::trace!("Skipping {}-byte frame: {e}", frame.len());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::ProtocolLabel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink that counts deliveries and can be told to fail.
    #[derive(Default)]
    struct CountingSink {
        delivered: AtomicUsize,
        fail: bool,
    }

    impl PacketSink for CountingSink {
        fn on_packet(&self, _packet: &ClassifiedPacket) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("host event channel closed");
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn sample_packet(size: u32) -> ClassifiedPacket {
        ClassifiedPacket {
            source_ip: "10.0.0.2".into(),
            dest_ip: "1.1.1.1".into(),
            source_port: 40000,
            dest_port: 53,
            protocol: ProtocolLabel::Dns,
            size_bytes: size,
            timestamp_millis: 0,
            payload: String::new(),
        }
    }

    fn emitter_with(sink: Arc<dyn PacketSink>, interval_ms: u64) -> EventEmitter {
        EventEmitter::new(
            sink,
            Arc::new(SessionCounters::new()),
            Arc::new(ProtocolStats::new()),
            interval_ms,
        )
    }

    #[test]
    fn test_every_packet_reaches_sink_but_one_diagnostic() {
        let sink = Arc::new(CountingSink::default());
        // A long interval keeps the whole burst inside one window.
        let emitter = emitter_with(sink.clone(), 60_000);

        let mut diagnostics = 0;
        for _ in 0..500 {
            let outcome = emitter.emit(&sample_packet(64));
            assert!(outcome.delivered);
            if outcome.diagnostic_logged {
                diagnostics += 1;
            }
        }

        assert_eq!(sink.delivered.load(Ordering::Relaxed), 500);
        assert_eq!(diagnostics, 1);
        assert_eq!(emitter.counters().packets_seen(), 500);
        assert_eq!(emitter.counters().bytes_seen(), 500 * 64);
    }

    #[test]
    fn test_sink_failure_is_swallowed_and_counted() {
        let sink = Arc::new(CountingSink {
            fail: true,
            ..Default::default()
        });
        let emitter = emitter_with(sink, 1000);

        let outcome = emitter.emit(&sample_packet(100));
        emitter.emit(&sample_packet(100));

        assert!(!outcome.delivered);
        let snap = emitter.counters().snapshot();
        assert_eq!(snap.packets_seen, 2);
        assert_eq!(snap.sink_failures, 2);
    }

    #[test]
    fn test_sink_failure_log_follows_diagnostic_interval() {
        let failing = || {
            Arc::new(CountingSink {
                fail: true,
                ..Default::default()
            })
        };

        let slow = emitter_with(failing(), 60_000);
        let logged = (0..3)
            .filter(|_| slow.emit(&sample_packet(10)).failure_logged)
            .count();
        assert_eq!(logged, 1);

        let fast = emitter_with(failing(), 200);
        assert!(fast.emit(&sample_packet(10)).failure_logged);
        assert!(!fast.emit(&sample_packet(10)).failure_logged);
        std::thread::sleep(Duration::from_millis(300));
        assert!(fast.emit(&sample_packet(10)).failure_logged);
    }

    #[test]
    fn test_process_frame_counts_parse_failures() {
        let sink = Arc::new(CountingSink::default());
        let emitter = emitter_with(sink.clone(), 1000);

        assert!(emitter.process_frame(&[0x45; 12]).is_none());
        assert!(emitter.process_frame(&[0u8; 40]).is_none());

        let snap = emitter.counters().snapshot();
        assert_eq!(snap.parse_failures, 2);
        assert_eq!(snap.packets_seen, 0);
        assert_eq!(sink.delivered.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_process_frame_emits_valid_frame() {
        let sink = Arc::new(CountingSink::default());
        let protocol_stats = Arc::new(ProtocolStats::new());
        let emitter = EventEmitter::new(
            sink.clone(),
            Arc::new(SessionCounters::new()),
            Arc::clone(&protocol_stats),
            1000,
        );

        let mut frame = vec![0u8; 24];
        frame[0] = 0x45;
        frame[9] = 6;
        frame[20..24].copy_from_slice(&[0x1F, 0x90, 0x01, 0xBB]);

        let outcome = emitter.process_frame(&frame).unwrap();
        assert!(outcome.delivered);
        assert_eq!(sink.delivered.load(Ordering::Relaxed), 1);
        assert_eq!(protocol_stats.snapshot()[0].protocol, ProtocolLabel::Https);
    }

    #[test]
    fn test_channel_sink_delivers_and_fails_after_drop() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_packet(&sample_packet(1)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), SinkEvent::Packet(sample_packet(1)));

        drop(rx);
        assert!(sink.on_packet(&sample_packet(1)).is_err());
        assert!(sink.on_stats(&CounterSnapshot::default()).is_err());
    }
}
