//! Typed views over raw IPv4, UDP and ICMP bytes. It is written as a ["sans-I/O"][sans-io] library
//! meaning it never touches a socket or a file itself, it only reads and writes byte buffers. The
//! readers validate the length fields of a buffer once in `parse()` so that the field accessors
//! never go out of bounds, and the builders write fields in network byte order and fill in the
//! RFC 1071 checksums.
//!
//! [sans-io]: https://sans-io.readthedocs.io
//!
//! ```
//! use std::net::Ipv4Addr;
//! use vnet_wire::{Ipv4Builder, Ipv4Reader, Protocol, UdpBuilder, UdpReader};
//!
//! let src = Ipv4Addr::new(10, 0, 0, 1);
//! let dst = Ipv4Addr::new(1, 2, 3, 4);
//! let payload = b"Alice";
//! let mut buf = vec![0u8; 20 + 8 + payload.len()];
//!
//! // the UDP datagram goes after the 20-byte IP header
//! let mut udp = UdpBuilder::new(&mut buf[20..]).unwrap();
//! udp.set_src_port(1000);
//! udp.set_dst_port(53);
//! udp.set_len(8 + payload.len() as u16);
//! udp.payload_mut().copy_from_slice(payload);
//! udp.fill_checksum(src, dst);
//!
//! let mut ip = Ipv4Builder::new(&mut buf[..]).unwrap();
//! ip.set_version(4);
//! ip.set_header_len(20);
//! ip.set_total_len(20 + 8 + payload.len() as u16);
//! ip.set_ttl(64);
//! ip.set_protocol(Protocol::Udp);
//! ip.set_src_addr(src);
//! ip.set_dst_addr(dst);
//! ip.fill_checksum();
//!
//! let ip = Ipv4Reader::parse(&buf[..]).unwrap();
//! assert!(ip.verify_checksum());
//! let udp = UdpReader::parse(ip.payload()).unwrap();
//! assert!(udp.verify_checksum(ip.src_addr(), ip.dst_addr()));
//! assert_eq!(udp.payload(), b"Alice");
//! ```

#![forbid(unsafe_code)]

pub mod checksum;
pub mod decode;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod udp;

#[cfg(test)]
mod tests;

pub use decode::{
    decode_ethernet_frame, decode_frame, DecodedPacket, IcmpFields, Ipv4Fields, UdpFields,
};
pub use ethernet::{EtherType, EthernetReader};
pub use icmp::{IcmpMessage, IcmpReader, Unreachable};
pub use ipv4::{Ipv4Builder, Ipv4Flags, Ipv4Reader, Ipv4View};
pub use udp::{UdpBuilder, UdpReader, UdpView};

/// The length of an IPv4 header without options. Options are not supported.
pub const IPV4_HEADER_LEN: usize = 20;

/// The length of a UDP header.
pub const UDP_HEADER_LEN: usize = 8;

/// The largest UDP payload that still fits in a single IPv4 packet whose `total_length` is a
/// 16-bit field.
pub const MAX_UDP_PAYLOAD_LEN: usize = u16::MAX as usize - IPV4_HEADER_LEN - UDP_HEADER_LEN;

static_assertions::const_assert_eq!(MAX_UDP_PAYLOAD_LEN, 65507);

/// Reasons that a buffer could not be interpreted as a packet. These are always recoverable; a
/// caller that is rendering captured bytes should show the reason rather than give up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MalformedPacket {
    /// The buffer is shorter than the header or than a length field claims.
    Truncated,
    /// Two length fields disagree (ex: the IPv4 header is longer than the whole packet).
    InconsistentLength,
    /// The IP version nibble is not 4.
    UnsupportedVersion(u8),
}

impl std::fmt::Display for MalformedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "malformed packet: truncated"),
            Self::InconsistentLength => write!(f, "malformed packet: inconsistent length fields"),
            Self::UnsupportedVersion(v) => {
                write!(f, "malformed packet: unsupported IP version {v}")
            }
        }
    }
}

impl std::error::Error for MalformedPacket {}

/// The IANA-assigned protocol number carried in the IPv4 `protocol` field.
// https://www.iana.org/assignments/protocol-numbers/protocol-numbers.xhtml
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    HopByHop,
    Icmp,
    Igmp,
    Tcp,
    Udp,
    Unknown(u8),
}

impl From<u8> for Protocol {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::HopByHop,
            0x01 => Self::Icmp,
            0x02 => Self::Igmp,
            0x06 => Self::Tcp,
            0x11 => Self::Udp,
            other => Self::Unknown(other),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(value: Protocol) -> Self {
        match value {
            Protocol::HopByHop => 0x00,
            Protocol::Icmp => 0x01,
            Protocol::Igmp => 0x02,
            Protocol::Tcp => 0x06,
            Protocol::Udp => 0x11,
            Protocol::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HopByHop => write!(f, "HOPOPT"),
            Self::Icmp => write!(f, "ICMP"),
            Self::Igmp => write!(f, "IGMP"),
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Unknown(x) => write!(f, "unknown ({x})"),
        }
    }
}

/// Read a big-endian `u16` from the first two bytes of `data`.
#[inline]
pub(crate) fn read_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

/// Write a big-endian `u16` into the first two bytes of `data`.
#[inline]
pub(crate) fn write_u16(data: &mut [u8], value: u16) {
    data[..2].copy_from_slice(&value.to_be_bytes());
}
