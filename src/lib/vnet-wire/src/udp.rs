//! UDP headers (RFC 768).

use std::net::Ipv4Addr;
use std::ops::Range;

use crate::{checksum, read_u16, write_u16, MalformedPacket, Protocol, UDP_HEADER_LEN};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    SrcPort,
    DstPort,
    Length,
    Checksum,
}

impl Field {
    pub const fn byte_range(&self) -> Range<usize> {
        match self {
            Self::SrcPort => 0..2,
            Self::DstPort => 2..4,
            Self::Length => 4..6,
            Self::Checksum => 6..8,
        }
    }
}

/// Sum the pseudo-header and the datagram, which includes its stored checksum field.
fn datagram_sum(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> u16 {
    // the UDP length can't exceed the 16-bit length field of a valid datagram
    let len = u16::try_from(datagram.len()).unwrap_or(u16::MAX);
    checksum::combine(&[
        checksum::pseudo_header(src, dst, Protocol::Udp, len),
        checksum::ones_complement_sum(datagram),
    ])
}

/// A read-only view of a UDP datagram.
#[derive(Copy, Clone, Debug)]
pub struct UdpReader<T> {
    buffer: T,
}

/// A [`UdpReader`] over a borrowed buffer.
pub type UdpView<'a> = UdpReader<&'a [u8]>;

impl<T: AsRef<[u8]>> UdpReader<T> {
    /// Check that `buffer` begins with a complete UDP datagram. Bytes after the UDP length are
    /// ignored.
    pub fn parse(buffer: T) -> Result<Self, MalformedPacket> {
        let buf = buffer.as_ref();

        if buf.len() < UDP_HEADER_LEN {
            return Err(MalformedPacket::Truncated);
        }

        let len = usize::from(read_u16(&buf[Field::Length.byte_range()]));
        if len < UDP_HEADER_LEN {
            return Err(MalformedPacket::InconsistentLength);
        }
        if buf.len() < len {
            return Err(MalformedPacket::Truncated);
        }

        Ok(Self { buffer })
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn buf(&self) -> &[u8] {
        self.buffer.as_ref()
    }

    pub fn src_port(&self) -> u16 {
        read_u16(&self.buf()[Field::SrcPort.byte_range()])
    }

    pub fn dst_port(&self) -> u16 {
        read_u16(&self.buf()[Field::DstPort.byte_range()])
    }

    /// The header and payload length in bytes.
    pub fn len(&self) -> u16 {
        read_u16(&self.buf()[Field::Length.byte_range()])
    }

    pub fn checksum(&self) -> u16 {
        read_u16(&self.buf()[Field::Checksum.byte_range()])
    }

    /// The header and payload.
    pub fn datagram(&self) -> &[u8] {
        &self.buf()[..usize::from(self.len())]
    }

    pub fn payload(&self) -> &[u8] {
        &self.datagram()[UDP_HEADER_LEN..]
    }

    /// Returns true if the checksum is correct for a datagram sent from `src` to `dst`. A
    /// checksum of zero means the sender did not compute one, and is always accepted.
    pub fn verify_checksum(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        self.checksum() == 0 || datagram_sum(src, dst, self.datagram()) == 0xffff
    }
}

/// Writes the fields of a UDP header into a buffer.
#[derive(Debug)]
pub struct UdpBuilder<T> {
    buffer: T,
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpBuilder<T> {
    pub fn new(buffer: T) -> Result<Self, MalformedPacket> {
        if buffer.as_ref().len() < UDP_HEADER_LEN {
            return Err(MalformedPacket::Truncated);
        }
        Ok(Self { buffer })
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn buf_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut()
    }

    fn len(&self) -> usize {
        usize::from(read_u16(&self.buffer.as_ref()[Field::Length.byte_range()]))
    }

    pub fn set_src_port(&mut self, port: u16) {
        write_u16(&mut self.buf_mut()[Field::SrcPort.byte_range()], port);
    }

    pub fn set_dst_port(&mut self, port: u16) {
        write_u16(&mut self.buf_mut()[Field::DstPort.byte_range()], port);
    }

    /// Set the header and payload length in bytes.
    pub fn set_len(&mut self, len: u16) {
        assert!(usize::from(len) >= UDP_HEADER_LEN);
        write_u16(&mut self.buf_mut()[Field::Length.byte_range()], len);
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(&mut self.buf_mut()[Field::Checksum.byte_range()], checksum);
    }

    /// The payload bytes. The length must already be set.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.len();
        &mut self.buf_mut()[UDP_HEADER_LEN..len]
    }

    /// Compute and store the checksum for a datagram sent from `src` to `dst`. The length and
    /// payload must already be written. A computed checksum of zero is stored as `0xffff`, since
    /// zero means "no checksum".
    pub fn fill_checksum(&mut self, src: Ipv4Addr, dst: Ipv4Addr) {
        let len = self.len();
        assert!(len <= self.buffer.as_ref().len());

        self.set_checksum(0);
        let sum = datagram_sum(src, dst, &self.buffer.as_ref()[..len]);
        let checksum = match !sum {
            0 => 0xffff,
            x => x,
        };
        self.set_checksum(checksum);
    }
}
