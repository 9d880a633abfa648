//! Transport port extraction and protocol/service labelling.
//!
//! The base label comes from the IPv4 protocol number. A well-known port table
//! then upgrades TCP/UDP labels to a service name when either port matches.

use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::core::header::Ipv4Header;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Protocol or service assigned to a classified packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolLabel {
    Tcp,
    Udp,
    Icmp,
    Dns,
    Https,
    Http,
    DnsTls,
    Ftp,
    Ssh,
    Smtp,
    Ntp,
    Dhcp,
    /// Any other IP protocol number, rendered as `Proto-<n>`.
    Other(u8),
}

impl ProtocolLabel {
    /// Every named label, in a fixed order. `Other` values follow these.
    pub const NAMED: [ProtocolLabel; 12] = [
        ProtocolLabel::Tcp,
        ProtocolLabel::Udp,
        ProtocolLabel::Icmp,
        ProtocolLabel::Dns,
        ProtocolLabel::Https,
        ProtocolLabel::Http,
        ProtocolLabel::DnsTls,
        ProtocolLabel::Ftp,
        ProtocolLabel::Ssh,
        ProtocolLabel::Smtp,
        ProtocolLabel::Ntp,
        ProtocolLabel::Dhcp,
    ];

    /// Number of distinct labels: the named ones plus one per protocol number.
    pub const COUNT: usize = Self::NAMED.len() + 256;

    pub fn as_str(&self) -> Cow<'static, str> {
        let s = match self {
            ProtocolLabel::Tcp => "TCP",
            ProtocolLabel::Udp => "UDP",
            ProtocolLabel::Icmp => "ICMP",
            ProtocolLabel::Dns => "DNS",
            ProtocolLabel::Https => "HTTPS",
            ProtocolLabel::Http => "HTTP",
            ProtocolLabel::DnsTls => "DNS-TLS",
            ProtocolLabel::Ftp => "FTP",
            ProtocolLabel::Ssh => "SSH",
            ProtocolLabel::Smtp => "SMTP",
            ProtocolLabel::Ntp => "NTP",
            ProtocolLabel::Dhcp => "DHCP",
            ProtocolLabel::Other(n) => return Cow::Owned(format!("Proto-{n}")),
        };
        Cow::Borrowed(s)
    }

    /// Dense index in `0..COUNT`, used by the lock-free stats table.
    pub fn index(&self) -> usize {
        match self {
            ProtocolLabel::Other(n) => Self::NAMED.len() + *n as usize,
            named => Self::NAMED
                .iter()
                .position(|l| l == named)
                .unwrap_or_default(),
        }
    }

    /// Inverse of [`index`](Self::index).
    pub fn from_index(index: usize) -> Option<Self> {
        if let Some(named) = Self::NAMED.get(index) {
            return Some(*named);
        }
        u8::try_from(index - Self::NAMED.len())
            .ok()
            .map(ProtocolLabel::Other)
    }
}

impl fmt::Display for ProtocolLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl Serialize for ProtocolLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

/// Well-known services, checked in order against source then destination port.
/// Each entry only applies on top of its expected transport.
const SERVICE_PORTS: &[(&[u16], u8, ProtocolLabel)] = &[
    (&[53], IPPROTO_UDP, ProtocolLabel::Dns),
    (&[443], IPPROTO_TCP, ProtocolLabel::Https),
    (&[80], IPPROTO_TCP, ProtocolLabel::Http),
    (&[853], IPPROTO_TCP, ProtocolLabel::DnsTls),
    (&[21], IPPROTO_TCP, ProtocolLabel::Ftp),
    (&[22], IPPROTO_TCP, ProtocolLabel::Ssh),
    (&[25], IPPROTO_TCP, ProtocolLabel::Smtp),
    (&[123], IPPROTO_UDP, ProtocolLabel::Ntp),
    (&[67, 68], IPPROTO_UDP, ProtocolLabel::Dhcp),
];

/// Source and destination ports. Both zero when the transport header is
/// truncated or the protocol carries no ports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportPorts {
    pub source: u16,
    pub destination: u16,
}

/// One classified frame, as delivered to the sink.
///
/// Serializes to the event shape hosts consume: camelCase field names,
/// `protocol` as its label string, `timestamp` as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedPacket {
    pub source_ip: String,
    pub dest_ip: String,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: ProtocolLabel,
    #[serde(rename = "size")]
    pub size_bytes: u32,
    #[serde(rename = "timestamp", serialize_with = "serialize_millis")]
    pub timestamp_millis: u64,
    /// Reserved; always empty.
    pub payload: String,
}

fn serialize_millis<S: Serializer>(millis: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(millis)
}

/// Read the two leading 16-bit ports of a TCP/UDP header at `offset`.
pub fn read_ports(frame: &[u8], offset: usize) -> TransportPorts {
    match frame.get(offset..offset + 4) {
        Some(b) => TransportPorts {
            source: u16::from_be_bytes([b[0], b[1]]),
            destination: u16::from_be_bytes([b[2], b[3]]),
        },
        None => TransportPorts::default(),
    }
}

/// Base label for an IP protocol number, before any port override.
pub fn base_label(protocol: u8) -> ProtocolLabel {
    match protocol {
        IPPROTO_TCP => ProtocolLabel::Tcp,
        IPPROTO_UDP => ProtocolLabel::Udp,
        IPPROTO_ICMP => ProtocolLabel::Icmp,
        n => ProtocolLabel::Other(n),
    }
}

/// First well-known service matching either port on the given transport.
pub fn service_label(protocol: u8, ports: TransportPorts) -> Option<ProtocolLabel> {
    SERVICE_PORTS
        .iter()
        .find(|(service_ports, transport, _)| {
            *transport == protocol
                && (service_ports.contains(&ports.source)
                    || service_ports.contains(&ports.destination))
        })
        .map(|(_, _, label)| *label)
}

/// Classify a located frame, stamping it with the current wall-clock time.
pub fn classify(frame: &[u8], header: &Ipv4Header) -> ClassifiedPacket {
    classify_at(frame, header, wall_clock_millis())
}

/// Classify a located frame with an explicit timestamp.
pub fn classify_at(frame: &[u8], header: &Ipv4Header, timestamp_millis: u64) -> ClassifiedPacket {
    let ports = match header.protocol {
        IPPROTO_TCP | IPPROTO_UDP => read_ports(frame, header.transport_offset()),
        _ => TransportPorts::default(),
    };
    let protocol =
        service_label(header.protocol, ports).unwrap_or_else(|| base_label(header.protocol));

    ClassifiedPacket {
        source_ip: header.source.to_string(),
        dest_ip: header.destination.to_string(),
        source_port: ports.source,
        dest_port: ports.destination,
        protocol,
        size_bytes: frame.len() as u32,
        timestamp_millis,
        payload: String::new(),
    }
}

/// Milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
