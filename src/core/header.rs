//! IPv4 header discovery and decoding.
//!
//! [`locate`] is a pure function of the frame bytes. It tolerates a few bytes
//! of leading encapsulation by probing the first offsets for a version-4 byte.

use std::net::Ipv4Addr;

use crate::config::{MAX_HEADER_SCAN_OFFSET, MIN_IPV4_HEADER_LEN};
use crate::error::ParseError;

/// Decoded fixed part of an IPv4 header, positioned inside its frame.
///
/// Only constructed when the version nibble is 4 and
/// `start_offset + header_len_bytes <= frame.len()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub start_offset: usize,
    pub version: u8,
    /// Internet Header Length in 32-bit words.
    pub ihl_words: u8,
    pub header_len_bytes: usize,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Offset of the first transport-layer byte.
    pub fn transport_offset(&self) -> usize {
        self.start_offset + self.header_len_bytes
    }
}

/// Locate and decode the IPv4 header inside `frame`.
pub fn locate(frame: &[u8]) -> Result<Ipv4Header, ParseError> {
    if frame.len() < MIN_IPV4_HEADER_LEN {
        return Err(ParseError::TooShort);
    }

    // Offset 0 is always probed; a bare 20-byte header must parse.
    let last_offset = (frame.len() - MIN_IPV4_HEADER_LEN).min(MAX_HEADER_SCAN_OFFSET);
    let start = (0..=last_offset)
        .find(|&i| frame[i] >> 4 == 4)
        .ok_or(ParseError::NotIpv4)?;

    let version_byte = frame[start];
    let ihl_words = version_byte & 0x0F;
    // An IHL below 5 cannot describe a real header: the addresses would overlap
    // the transport bytes.
    if (ihl_words as usize) * 4 < MIN_IPV4_HEADER_LEN {
        return Err(ParseError::NotIpv4);
    }
    let header_len_bytes = ihl_words as usize * 4;
    if start + header_len_bytes > frame.len() {
        return Err(ParseError::HeaderLengthExceedsFrame);
    }

    Ok(Ipv4Header {
        start_offset: start,
        version: version_byte >> 4,
        ihl_words,
        header_len_bytes,
        protocol: frame[start + 9],
        source: read_addr(frame, start + 12),
        destination: read_addr(frame, start + 16),
    })
}

fn read_addr(frame: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(frame[at], frame[at + 1], frame[at + 2], frame[at + 3])
}
