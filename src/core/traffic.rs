//! Session traffic accounting with lock-free atomics.
//!
//! [`SessionCounters`] holds the monotonically increasing totals for one
//! capture session. [`ProtocolStats`] breaks packets and bytes down per
//! protocol label in a fixed table of atomics, so workers never take a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::core::classifier::ProtocolLabel;

/// Running totals for one capture session. Every field only grows.
#[derive(Debug, Default)]
pub struct SessionCounters {
    packets_seen: AtomicU64,
    bytes_seen: AtomicU64,
    frames_read: AtomicU64,
    frames_forwarded: AtomicU64,
    forward_failures: AtomicU64,
    parse_failures: AtomicU64,
    sink_failures: AtomicU64,
    oversized_frames: AtomicU64,
}

/// Point-in-time copy of [`SessionCounters`], serializable for the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    /// Frames successfully classified and emitted.
    pub packets_seen: u64,
    pub bytes_seen: u64,
    pub frames_read: u64,
    pub frames_forwarded: u64,
    pub forward_failures: u64,
    /// Frames dropped from classification by header discovery.
    pub parse_failures: u64,
    pub sink_failures: u64,
    /// Frames longer than the MTU: forwarded untouched, never classified.
    pub oversized_frames: u64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one emitted packet. Called from worker threads.
    pub fn record_packet(&self, size_bytes: u64) {
        self.packets_seen.fetch_add(1, Ordering::Relaxed);
        self.bytes_seen.fetch_add(size_bytes, Ordering::Relaxed);
    }

    pub fn record_frame_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward(&self, ok: bool) {
        if ok {
            self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.forward_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_oversized(&self) {
        self.oversized_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets_seen.load(Ordering::Relaxed)
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            packets_seen: self.packets_seen.load(Ordering::Relaxed),
            bytes_seen: self.bytes_seen.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            oversized_frames: self.oversized_frames.load(Ordering::Relaxed),
        }
    }
}

/// Packets and bytes attributed to one protocol label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolStat {
    pub protocol: ProtocolLabel,
    pub packet_count: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Default)]
struct LabelCounter {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// Per-label breakdown, one slot per possible [`ProtocolLabel`].
#[derive(Debug)]
pub struct ProtocolStats {
    slots: Box<[LabelCounter]>,
}

impl Default for ProtocolStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolStats {
    pub fn new() -> Self {
        Self {
            slots: (0..ProtocolLabel::COUNT)
                .map(|_| LabelCounter::default())
                .collect(),
        }
    }

    pub fn record(&self, label: ProtocolLabel, size_bytes: u64) {
        let slot = &self.slots[label.index()];
        slot.packets.fetch_add(1, Ordering::Relaxed);
        slot.bytes.fetch_add(size_bytes, Ordering::Relaxed);
    }

    /// Labels seen so far, busiest first. Ties are ordered by label text.
    pub fn snapshot(&self) -> Vec<ProtocolStat> {
        let mut stats: Vec<ProtocolStat> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let packet_count = slot.packets.load(Ordering::Relaxed);
                if packet_count == 0 {
                    return None;
                }
                Some(ProtocolStat {
                    protocol: ProtocolLabel::from_index(index)?,
                    packet_count,
                    total_bytes: slot.bytes.load(Ordering::Relaxed),
                })
            })
            .collect();
        stats.sort_by(|a, b| {
            b.packet_count
                .cmp(&a.packet_count)
                .then_with(|| a.protocol.as_str().cmp(&b.protocol.as_str()))
        });
        stats
    }

    /// Zero every slot. Concurrent `record` calls may land on either side.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.packets.store(0, Ordering::Relaxed);
            slot.bytes.store(0, Ordering::Relaxed);
        }
    }
}

/// Plain-text report of the per-protocol table.
pub fn export_summary(stats: &[ProtocolStat]) -> String {
    let mut out = String::from("Packet Export\n=============\n");
    for stat in stats {
        out.push_str(&format!(
            "Protocol: {}, Packets: {}, Bytes: {}\n",
            stat.protocol, stat.packet_count, stat.total_bytes
        ));
    }
    out
}

/// Format a byte count in a compact human-readable form.
pub fn format_bytes_compact(bytes: u64) -> String {
    let b = bytes as f64;
    if b < 1024.0 {
        format!("{bytes} B")
    } else if b < 1024.0 * 1024.0 {
        format!("{:.1} KB", b / 1024.0)
    } else if b < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", b / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", b / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(SessionCounters::new().snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_record_packet_accumulates() {
        let counters = SessionCounters::new();
        counters.record_packet(60);
        counters.record_packet(1500);
        counters.record_forward(true);
        counters.record_forward(false);
        counters.record_parse_failure();
        let snap = counters.snapshot();
        assert_eq!(snap.packets_seen, 2);
        assert_eq!(snap.bytes_seen, 1560);
        assert_eq!(snap.frames_forwarded, 1);
        assert_eq!(snap.forward_failures, 1);
        assert_eq!(snap.parse_failures, 1);
    }

    #[test]
    fn test_counters_lose_nothing_under_contention() {
        let counters = Arc::new(SessionCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        counters.record_packet(3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.packets_seen(), 80_000);
        assert_eq!(counters.bytes_seen(), 240_000);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let counters = SessionCounters::new();
        counters.record_packet(10);
        let json = serde_json::to_value(counters.snapshot()).unwrap();
        assert_eq!(json["packetsSeen"], 1);
        assert_eq!(json["bytesSeen"], 10);
        assert!(json.get("framesRead").is_some());
    }

    #[test]
    fn test_protocol_stats_sorted_by_packet_count() {
        let stats = ProtocolStats::new();
        stats.record(ProtocolLabel::Dns, 80);
        stats.record(ProtocolLabel::Https, 1400);
        stats.record(ProtocolLabel::Https, 1400);
        stats.record(ProtocolLabel::Other(47), 100);

        let snap = stats.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].protocol, ProtocolLabel::Https);
        assert_eq!(snap[0].packet_count, 2);
        assert_eq!(snap[0].total_bytes, 2800);
        // DNS and Proto-47 tie on count; label text decides.
        assert_eq!(snap[1].protocol, ProtocolLabel::Dns);
        assert_eq!(snap[2].protocol, ProtocolLabel::Other(47));
    }

    #[test]
    fn test_protocol_stats_clear() {
        let stats = ProtocolStats::new();
        stats.record(ProtocolLabel::Tcp, 40);
        stats.clear();
        assert!(stats.snapshot().is_empty());
    }

    #[test]
    fn test_protocol_stat_json_shape() {
        let stats = ProtocolStats::new();
        stats.record(ProtocolLabel::DnsTls, 90);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json[0]["protocol"], "DNS-TLS");
        assert_eq!(json[0]["packetCount"], 1);
        assert_eq!(json[0]["totalBytes"], 90);
    }

    #[test]
    fn test_export_summary_format() {
        let stats = ProtocolStats::new();
        stats.record(ProtocolLabel::Udp, 100);
        stats.record(ProtocolLabel::Udp, 28);
        let text = export_summary(&stats.snapshot());
        assert_eq!(
            text,
            "Packet Export\n=============\nProtocol: UDP, Packets: 2, Bytes: 128\n"
        );
    }

    #[test]
    fn test_format_bytes_compact() {
        assert_eq!(format_bytes_compact(0), "0 B");
        assert_eq!(format_bytes_compact(1023), "1023 B");
        assert_eq!(format_bytes_compact(1536), "1.5 KB");
        assert_eq!(format_bytes_compact(2_621_440), "2.50 MB");
        assert_eq!(format_bytes_compact(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
