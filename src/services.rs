//! Background services attached to a capture session.
//!
//! Services run as tasks on the session's worker pool, so shutting the pool
//! down stops them with it.

use std::sync::Arc;
use std::time::Duration;

use crate::core::emitter::PacketSink;
use crate::core::traffic::SessionCounters;

/// Spawn the stats reporter: pushes a counter snapshot to the sink every
/// `interval`. Delivery errors are logged and the reporter keeps going.
pub fn start_stats_reporter(
    handle: &tokio::runtime::Handle,
    counters: Arc<SessionCounters>,
    sink: Arc<dyn PacketSink>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so the first report
        // covers a full interval.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = counters.snapshot();
            if let Err(e) = sink.on_stats(&snapshot) {
                tracing::warn!("Failed to deliver session stats: {e:#}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::emitter::{ChannelSink, SinkEvent};

    #[test]
    fn test_stats_reporter_delivers_snapshots() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let (sink, mut events) = ChannelSink::new();
        let counters = Arc::new(SessionCounters::new());
        counters.record_packet(42);

        let task = start_stats_reporter(
            runtime.handle(),
            Arc::clone(&counters),
            Arc::new(sink),
            Duration::from_millis(10),
        );

        let event = runtime.block_on(async {
            tokio::time::timeout(Duration::from_secs(5), events.recv()).await
        });
        match event {
            Ok(Some(SinkEvent::Stats(snap))) => {
                assert_eq!(snap.packets_seen, 1);
                assert_eq!(snap.bytes_seen, 42);
            }
            other => panic!("expected a stats event, got {other:?}"),
        }

        task.abort();
        runtime.shutdown_background();
    }
}
