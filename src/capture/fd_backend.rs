//! File-descriptor tunnel for unix hosts (TUN devices, VPN service descriptors).
//!
//! Reads wait in `poll(2)` on the tunnel descriptor and on the read end of a
//! wake pipe. The closer drops the pipe's write end, which wakes the waiting
//! reader with `POLLHUP` so it can report end of stream without racing a
//! close of the tunnel descriptor itself.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::capture::tunnel::{PacketForwarder, Tunnel, TunnelCloser, TunnelRead, TunnelReader};
use crate::config::MAX_READ_LEN;

/// Tunnel over an already-open, bidirectional descriptor.
pub struct FdTunnel {
    file: File,
    wake_rx: OwnedFd,
    closer: Arc<WakeCloser>,
    buf: Vec<u8>,
}

struct WakeCloser {
    wake_tx: Mutex<Option<OwnedFd>>,
}

impl TunnelCloser for WakeCloser {
    fn close(&self) {
        match self.wake_tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }
}

impl FdTunnel {
    /// Take ownership of `fd`. Fails only if the wake pipe cannot be created.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        let (wake_rx, wake_tx) = nix::unistd::pipe().map_err(io::Error::from)?;
        Ok(Self {
            file: File::from(fd),
            wake_rx,
            closer: Arc::new(WakeCloser {
                wake_tx: Mutex::new(Some(wake_tx)),
            }),
            buf: vec![0u8; MAX_READ_LEN],
        })
    }

    /// Wait until the tunnel is readable or the closer fired.
    /// Returns `false` when woken by the closer.
    fn wait_readable(&self) -> io::Result<bool> {
        loop {
            let mut fds = [
                PollFd::new(self.file.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.wake_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }

            let woken = fds[1].revents().map_or(false, |r| !r.is_empty());
            if woken {
                return Ok(false);
            }
            let tun = fds[0].revents().unwrap_or(PollFlags::empty());
            if tun.contains(PollFlags::POLLNVAL) {
                return Err(io::Error::from(Errno::EBADF));
            }
            if tun.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP) {
                return Ok(true);
            }
        }
    }
}

impl TunnelReader for FdTunnel {
    fn read(&mut self) -> io::Result<TunnelRead> {
        if !self.wait_readable()? {
            return Ok(TunnelRead::EndOfStream);
        }
        let n = self.file.read(&mut self.buf)?;
        if n == 0 {
            return Ok(TunnelRead::EndOfStream);
        }
        Ok(TunnelRead::from_bytes(self.buf[..n].to_vec()))
    }
}

impl PacketForwarder for FdTunnel {
    fn forward(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()
    }
}

impl Tunnel for FdTunnel {
    fn closer(&self) -> Arc<dyn TunnelCloser> {
        self.closer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tunnel::RawFrame;
    use crate::config::MTU;
    use std::os::unix::net::UnixDatagram;
    use std::time::Duration;

    /// A datagram socket pair keeps frame boundaries like a TUN device.
    fn tunnel_pair() -> (FdTunnel, UnixDatagram) {
        let (ours, peer) = UnixDatagram::pair().unwrap();
        (FdTunnel::new(OwnedFd::from(ours)).unwrap(), peer)
    }

    #[test]
    fn test_reads_one_frame_per_datagram() {
        let (mut tunnel, peer) = tunnel_pair();
        peer.send(&[0x45, 0, 0, 20]).unwrap();
        peer.send(&[0x45, 0, 0, 21, 9]).unwrap();

        assert_eq!(
            tunnel.read().unwrap(),
            TunnelRead::Frame(RawFrame::new(vec![0x45, 0, 0, 20]).unwrap())
        );
        assert_eq!(
            tunnel.read().unwrap(),
            TunnelRead::Frame(RawFrame::new(vec![0x45, 0, 0, 21, 9]).unwrap())
        );
    }

    #[test]
    fn test_frame_above_mtu_read_and_forwarded_whole() {
        let (mut tunnel, peer) = tunnel_pair();
        let big = vec![0x45u8; 1600];
        peer.send(&big).unwrap();

        let TunnelRead::Oversized(bytes) = tunnel.read().unwrap() else {
            panic!("expected an oversized frame");
        };
        assert_eq!(bytes.len(), 1600);
        assert!(bytes.len() > MTU);

        tunnel.forward(&bytes).unwrap();
        let mut buf = vec![0u8; 4096];
        let n = peer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &big[..]);
    }

    #[test]
    fn test_forward_writes_frame_unmodified() {
        let (mut tunnel, peer) = tunnel_pair();
        let frame = [0x45u8, 0x00, 0x00, 0x18, 0xAB, 0xCD];
        tunnel.forward(&frame).unwrap();

        let mut buf = [0u8; 64];
        let n = peer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &frame);
    }

    #[test]
    fn test_close_unblocks_pending_read() {
        let (mut tunnel, _peer) = tunnel_pair();
        let closer = tunnel.closer();
        let reader = std::thread::spawn(move || tunnel.read().unwrap());

        std::thread::sleep(Duration::from_millis(20));
        closer.close();
        assert_eq!(reader.join().unwrap(), TunnelRead::EndOfStream);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut tunnel, _peer) = tunnel_pair();
        let closer = tunnel.closer();
        closer.close();
        closer.close();
        assert_eq!(tunnel.read().unwrap(), TunnelRead::EndOfStream);
    }
}
