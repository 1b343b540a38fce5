//! Decoding captured frames into owned, protocol-specific field structs for display.
//!
//! Decoding is pure: the input bytes are never modified, and every problem with the input is
//! reported as a [`MalformedPacket`] rather than a panic.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::ethernet::{EtherType, EthernetReader};
use crate::icmp::{IcmpMessage, IcmpReader};
use crate::ipv4::{Ipv4Flags, Ipv4Reader};
use crate::udp::UdpReader;
use crate::{MalformedPacket, Protocol};

/// The fields of a decoded IPv4 header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Fields {
    pub version: u8,
    pub header_len: usize,
    pub dscp: u8,
    pub ecn: u8,
    pub total_len: u16,
    pub ident: u16,
    pub flags: Ipv4Flags,
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: Protocol,
    pub checksum: u16,
    pub checksum_valid: bool,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpFields {
    pub src_port: u16,
    pub dst_port: u16,
    pub len: u16,
    pub checksum: u16,
    pub checksum_valid: bool,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IcmpFields {
    pub kind: u8,
    pub code: u8,
    pub message: IcmpMessage,
    pub checksum: u16,
    pub checksum_valid: bool,
    pub body: Vec<u8>,
}

/// A decoded IPv4 packet. Each variant only carries the layers that its protocol defines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedPacket {
    /// A protocol that is recognized but whose payload is not decoded (ex: TCP).
    Ipv4Only(Ipv4Fields),
    Ipv4WithUdp(Ipv4Fields, UdpFields),
    Ipv4WithIcmp(Ipv4Fields, IcmpFields),
    Ipv4WithUnknownProtocol(Ipv4Fields),
}

impl DecodedPacket {
    pub fn ip(&self) -> &Ipv4Fields {
        match self {
            Self::Ipv4Only(ip)
            | Self::Ipv4WithUdp(ip, _)
            | Self::Ipv4WithIcmp(ip, _)
            | Self::Ipv4WithUnknownProtocol(ip) => ip,
        }
    }

    pub fn udp(&self) -> Option<&UdpFields> {
        match self {
            Self::Ipv4WithUdp(_, udp) => Some(udp),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpFields> {
        match self {
            Self::Ipv4WithIcmp(_, icmp) => Some(icmp),
            _ => None,
        }
    }

    /// Returns true if every checksum in the packet is correct.
    pub fn checksums_valid(&self) -> bool {
        self.ip().checksum_valid
            && self.udp().map_or(true, |x| x.checksum_valid)
            && self.icmp().map_or(true, |x| x.checksum_valid)
    }
}

fn validity(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "INVALID"
    }
}

/// Render up to the first 16 bytes as hex, with an ellipsis if there are more.
fn hex_preview(bytes: &[u8]) -> String {
    const MAX: usize = 16;
    let mut s = String::with_capacity(3 * MAX + 3);
    for (i, b) in bytes.iter().take(MAX).enumerate() {
        if i != 0 {
            s.push(' ');
        }
        write!(s, "{b:02x}").unwrap();
    }
    if bytes.len() > MAX {
        s.push_str(" ...");
    }
    s
}

impl std::fmt::Display for Ipv4Fields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "IPv4 {} -> {}", self.src, self.dst)?;
        writeln!(f, "  version: {}", self.version)?;
        writeln!(f, "  header length: {}", self.header_len)?;
        writeln!(f, "  dscp: {}, ecn: {}", self.dscp, self.ecn)?;
        writeln!(f, "  total length: {}", self.total_len)?;
        writeln!(f, "  identification: {:#06x}", self.ident)?;
        writeln!(
            f,
            "  flags: [{}{}], fragment offset: {}",
            if self.flags.contains(Ipv4Flags::DONT_FRAGMENT) {
                "DF"
            } else {
                ""
            },
            if self.flags.contains(Ipv4Flags::MORE_FRAGMENTS) {
                "MF"
            } else {
                ""
            },
            self.frag_offset,
        )?;
        writeln!(f, "  ttl: {}", self.ttl)?;
        writeln!(f, "  protocol: {}", self.protocol)?;
        writeln!(
            f,
            "  checksum: {:#06x} ({})",
            self.checksum,
            validity(self.checksum_valid)
        )
    }
}

impl std::fmt::Display for UdpFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "UDP {} -> {}", self.src_port, self.dst_port)?;
        writeln!(f, "  length: {}", self.len)?;
        writeln!(
            f,
            "  checksum: {:#06x} ({})",
            self.checksum,
            validity(self.checksum_valid)
        )?;
        writeln!(
            f,
            "  payload ({} bytes): {}",
            self.payload.len(),
            hex_preview(&self.payload)
        )
    }
}

impl std::fmt::Display for IcmpFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ICMP {}", self.message)?;
        writeln!(f, "  type: {}, code: {}", self.kind, self.code)?;
        writeln!(
            f,
            "  checksum: {:#06x} ({})",
            self.checksum,
            validity(self.checksum_valid)
        )?;
        writeln!(
            f,
            "  body ({} bytes): {}",
            self.body.len(),
            hex_preview(&self.body)
        )
    }
}

impl std::fmt::Display for DecodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ip())?;
        match self {
            Self::Ipv4WithUdp(_, udp) => write!(f, "{udp}"),
            Self::Ipv4WithIcmp(_, icmp) => write!(f, "{icmp}"),
            Self::Ipv4Only(_) | Self::Ipv4WithUnknownProtocol(_) => Ok(()),
        }
    }
}

impl<T: AsRef<[u8]>> From<&Ipv4Reader<T>> for Ipv4Fields {
    fn from(ip: &Ipv4Reader<T>) -> Self {
        Self {
            version: ip.version(),
            header_len: ip.header_len(),
            dscp: ip.dscp(),
            ecn: ip.ecn(),
            total_len: ip.total_len(),
            ident: ip.ident(),
            flags: ip.flags(),
            frag_offset: ip.frag_offset(),
            ttl: ip.ttl(),
            protocol: ip.protocol(),
            checksum: ip.checksum(),
            checksum_valid: ip.verify_checksum(),
            src: ip.src_addr(),
            dst: ip.dst_addr(),
        }
    }
}

/// Decode a frame that starts with an IPv4 header.
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedPacket, MalformedPacket> {
    let Some(first) = bytes.first() else {
        return Err(MalformedPacket::Truncated);
    };

    let version = first >> 4;
    if version != 4 {
        return Err(MalformedPacket::UnsupportedVersion(version));
    }

    let ip = Ipv4Reader::parse(bytes)?;
    let ip_fields = Ipv4Fields::from(&ip);

    Ok(match ip.protocol() {
        Protocol::Udp => {
            let udp = UdpReader::parse(ip.payload())?;
            let udp_fields = UdpFields {
                src_port: udp.src_port(),
                dst_port: udp.dst_port(),
                len: udp.len(),
                checksum: udp.checksum(),
                checksum_valid: udp.verify_checksum(ip.src_addr(), ip.dst_addr()),
                payload: udp.payload().to_vec(),
            };
            DecodedPacket::Ipv4WithUdp(ip_fields, udp_fields)
        }
        Protocol::Icmp => {
            let icmp = IcmpReader::parse(ip.payload())?;
            let icmp_fields = IcmpFields {
                kind: icmp.kind(),
                code: icmp.code(),
                message: icmp.message(),
                checksum: icmp.checksum(),
                checksum_valid: icmp.verify_checksum(),
                body: icmp.body().to_vec(),
            };
            DecodedPacket::Ipv4WithIcmp(ip_fields, icmp_fields)
        }
        Protocol::HopByHop | Protocol::Igmp | Protocol::Tcp => DecodedPacket::Ipv4Only(ip_fields),
        Protocol::Unknown(_) => DecodedPacket::Ipv4WithUnknownProtocol(ip_fields),
    })
}

/// Decode a frame that starts with an Ethernet II header. Returns `None` if the frame does not
/// carry IPv4.
pub fn decode_ethernet_frame(bytes: &[u8]) -> Result<Option<DecodedPacket>, MalformedPacket> {
    let eth = EthernetReader::parse(bytes)?;
    if eth.ether_type() != EtherType::Ipv4 {
        return Ok(None);
    }
    decode_frame(eth.payload()).map(Some)
}
