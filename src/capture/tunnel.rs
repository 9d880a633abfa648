//! Tunnel abstractions: raw frames, reading, pass-through forwarding, closing.
//!
//! The capture thread is the only reader and the only writer of a tunnel.
//! [`TunnelCloser`] is the one handle other threads hold; closing unblocks a
//! pending read, which then reports [`TunnelRead::EndOfStream`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::MTU;

/// One classifiable frame read from the tunnel. Never longer than [`MTU`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    data: Vec<u8>,
}

impl RawFrame {
    /// Wrap frame bytes, rejecting anything longer than the MTU.
    pub fn new(data: Vec<u8>) -> io::Result<Self> {
        if data.len() > MTU {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds MTU {MTU}", data.len()),
            ));
        }
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of one blocking tunnel read.
#[derive(Debug, PartialEq, Eq)]
pub enum TunnelRead {
    Frame(RawFrame),
    /// A frame longer than the MTU. Still forwarded byte for byte, but not
    /// classified.
    Oversized(Vec<u8>),
    EndOfStream,
}

impl TunnelRead {
    /// Sort freshly read bytes into a classifiable frame or an oversized one.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.len() > MTU {
            TunnelRead::Oversized(bytes)
        } else {
            TunnelRead::Frame(RawFrame { data: bytes })
        }
    }
}

pub trait TunnelReader {
    /// Block until a frame arrives, the stream ends, or an error occurs.
    fn read(&mut self) -> io::Result<TunnelRead>;
}

pub trait PacketForwarder {
    /// Write `frame` back to the tunnel unmodified and flush.
    fn forward(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Thread-safe handle that unblocks and ends a tunnel's pending read.
pub trait TunnelCloser: Send + Sync {
    fn close(&self);
}

/// A bidirectional tunnel endpoint owned by the capture thread.
pub trait Tunnel: TunnelReader + PacketForwarder + Send + 'static {
    fn closer(&self) -> Arc<dyn TunnelCloser>;
}

/// How often a blocked [`ChannelTunnel`] read re-checks the closed flag.
const CHANNEL_CLOSE_POLL: Duration = Duration::from_millis(50);

/// In-process tunnel for hosts that read the descriptor themselves.
///
/// The host pushes frames through the `Sender` returned by [`ChannelTunnel::new`]
/// and receives the pass-through copies on the returned `Receiver`. Dropping the
/// sender, or closing the tunnel, ends the stream.
#[derive(Debug)]
pub struct ChannelTunnel {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
    closed: Arc<ClosedFlag>,
}

#[derive(Debug, Default)]
struct ClosedFlag(AtomicBool);

impl TunnelCloser for ClosedFlag {
    fn close(&self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ChannelTunnel {
    pub fn new() -> (Self, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        let (frames_tx, frames_rx) = mpsc::channel();
        let (forwarded_tx, forwarded_rx) = mpsc::channel();
        let tunnel = Self {
            inbound: frames_rx,
            outbound: forwarded_tx,
            closed: Arc::new(ClosedFlag::default()),
        };
        (tunnel, frames_tx, forwarded_rx)
    }

    fn is_closed(&self) -> bool {
        self.closed.0.load(Ordering::Acquire)
    }
}

impl TunnelReader for ChannelTunnel {
    fn read(&mut self) -> io::Result<TunnelRead> {
        loop {
            if self.is_closed() {
                return Ok(TunnelRead::EndOfStream);
            }
            match self.inbound.recv_timeout(CHANNEL_CLOSE_POLL) {
                Ok(bytes) => return Ok(TunnelRead::from_bytes(bytes)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(TunnelRead::EndOfStream),
            }
        }
    }
}

impl PacketForwarder for ChannelTunnel {
    fn forward(&mut self, frame: &[u8]) -> io::Result<()> {
        self.outbound
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "forward receiver dropped"))
    }
}

impl Tunnel for ChannelTunnel {
    fn closer(&self) -> Arc<dyn TunnelCloser> {
        self.closed.clone()
    }
}
