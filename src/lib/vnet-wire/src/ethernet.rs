//! Ethernet II framing. Captures taken from a real interface carry a 14-byte Ethernet header in
//! front of the IP packet, which is skipped before decoding.

use crate::{read_u16, MalformedPacket};

pub const ETHERNET_HEADER_LEN: usize = 14;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EtherType {
    Ipv4,
    Arp,
    Ipv6,
    Other(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => Self::Ipv4,
            0x0806 => Self::Arp,
            0x86dd => Self::Ipv6,
            x => Self::Other(x),
        }
    }
}

/// A read-only view of an Ethernet II frame.
#[derive(Copy, Clone, Debug)]
pub struct EthernetReader<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> EthernetReader<T> {
    pub fn parse(buffer: T) -> Result<Self, MalformedPacket> {
        if buffer.as_ref().len() < ETHERNET_HEADER_LEN {
            return Err(MalformedPacket::Truncated);
        }
        Ok(Self { buffer })
    }

    fn buf(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    pub fn dst_mac(&self) -> [u8; 6] {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.buf()[0..6]);
        mac
    }

    pub fn src_mac(&self) -> [u8; 6] {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.buf()[6..12]);
        mac
    }

    pub fn ether_type(&self) -> EtherType {
        EtherType::from(read_u16(&self.buf()[12..14]))
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf()[ETHERNET_HEADER_LEN..]
    }
}
