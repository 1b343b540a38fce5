//! IPv4 headers (RFC 791). Options are never written, but a reader will skip over them if the
//! header length says they are present.

use std::net::Ipv4Addr;
use std::ops::Range;

use crate::{checksum, read_u16, write_u16, MalformedPacket, Protocol, IPV4_HEADER_LEN};

/// A field of the fixed IPv4 header. Used by the visualizer to highlight the bytes of a field in
/// a hex dump.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    VersionAndHeaderLen,
    DscpAndEcn,
    TotalLen,
    Identification,
    Flags,
    FragmentOffset,
    Ttl,
    Protocol,
    Checksum,
    SrcAddr,
    DstAddr,
}

impl Field {
    /// The bytes that hold this field. Fields that share a byte with another field (ex: the flags
    /// and the fragment offset) return the whole byte range that contains them.
    pub const fn byte_range(&self) -> Range<usize> {
        match self {
            Self::VersionAndHeaderLen => 0..1,
            Self::DscpAndEcn => 1..2,
            Self::TotalLen => 2..4,
            Self::Identification => 4..6,
            Self::Flags => 6..7,
            Self::FragmentOffset => 6..8,
            Self::Ttl => 8..9,
            Self::Protocol => 9..10,
            Self::Checksum => 10..12,
            Self::SrcAddr => 12..16,
            Self::DstAddr => 16..20,
        }
    }
}

bitflags::bitflags! {
    /// The three flag bits at the top of the flags/fragment-offset word.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Ipv4Flags: u8 {
        const MORE_FRAGMENTS = 1 << 0;
        const DONT_FRAGMENT = 1 << 1;
        const RESERVED = 1 << 2;
    }
}

const FRAG_OFFSET_MASK: u16 = 0x1fff;

fn read_addr(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

/// A read-only view of an IPv4 packet. The length fields are checked once in [`parse`](Self::parse)
/// so none of the accessors can go out of bounds.
#[derive(Copy, Clone, Debug)]
pub struct Ipv4Reader<T> {
    buffer: T,
}

/// An [`Ipv4Reader`] over a borrowed buffer.
pub type Ipv4View<'a> = Ipv4Reader<&'a [u8]>;

impl<T: AsRef<[u8]>> Ipv4Reader<T> {
    /// Check that `buffer` holds a complete IPv4 packet. The version nibble is not checked here;
    /// see [`version`](Self::version).
    pub fn parse(buffer: T) -> Result<Self, MalformedPacket> {
        let buf = buffer.as_ref();

        if buf.len() < IPV4_HEADER_LEN {
            return Err(MalformedPacket::Truncated);
        }

        let header_len = usize::from(buf[0] & 0x0f) * 4;
        let total_len = usize::from(read_u16(&buf[Field::TotalLen.byte_range()]));

        if header_len < IPV4_HEADER_LEN {
            return Err(MalformedPacket::InconsistentLength);
        }
        if header_len > total_len {
            return Err(MalformedPacket::InconsistentLength);
        }
        if buf.len() < total_len {
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

    pub fn version(&self) -> u8 {
        self.buf()[0] >> 4
    }

    /// The header length in bytes (the IHL field multiplied by 4).
    pub fn header_len(&self) -> usize {
        usize::from(self.buf()[0] & 0x0f) * 4
    }

    pub fn dscp(&self) -> u8 {
        self.buf()[1] >> 2
    }

    pub fn ecn(&self) -> u8 {
        self.buf()[1] & 0b11
    }

    pub fn total_len(&self) -> u16 {
        read_u16(&self.buf()[Field::TotalLen.byte_range()])
    }

    pub fn ident(&self) -> u16 {
        read_u16(&self.buf()[Field::Identification.byte_range()])
    }

    pub fn flags(&self) -> Ipv4Flags {
        Ipv4Flags::from_bits_retain(self.buf()[Field::Flags.byte_range().start] >> 5)
    }

    pub fn dont_frag(&self) -> bool {
        self.flags().contains(Ipv4Flags::DONT_FRAGMENT)
    }

    pub fn more_frags(&self) -> bool {
        self.flags().contains(Ipv4Flags::MORE_FRAGMENTS)
    }

    /// The fragment offset in units of 8 bytes.
    pub fn frag_offset(&self) -> u16 {
        read_u16(&self.buf()[Field::FragmentOffset.byte_range()]) & FRAG_OFFSET_MASK
    }

    pub fn ttl(&self) -> u8 {
        self.buf()[Field::Ttl.byte_range().start]
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.buf()[Field::Protocol.byte_range().start])
    }

    pub fn checksum(&self) -> u16 {
        read_u16(&self.buf()[Field::Checksum.byte_range()])
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        read_addr(&self.buf()[Field::SrcAddr.byte_range()])
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        read_addr(&self.buf()[Field::DstAddr.byte_range()])
    }

    /// The header bytes, including any options.
    pub fn header(&self) -> &[u8] {
        &self.buf()[..self.header_len()]
    }

    /// Returns true if the stored header checksum is correct.
    pub fn verify_checksum(&self) -> bool {
        checksum::verify(self.header())
    }

    /// The bytes following the header, up to the total length. Any trailing bytes in the buffer
    /// past the total length (ex: Ethernet padding) are not included.
    pub fn payload(&self) -> &[u8] {
        &self.buf()[self.header_len()..usize::from(self.total_len())]
    }
}

/// Writes the fields of an IPv4 header into a buffer. Nothing is validated beyond the buffer
/// being large enough for a header, so fields can be set in any order.
#[derive(Debug)]
pub struct Ipv4Builder<T> {
    buffer: T,
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Builder<T> {
    pub fn new(buffer: T) -> Result<Self, MalformedPacket> {
        if buffer.as_ref().len() < IPV4_HEADER_LEN {
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

    pub fn set_version(&mut self, version: u8) {
        assert!(version <= 0x0f);
        let byte = &mut self.buf_mut()[0];
        *byte = (*byte & 0x0f) | (version << 4);
    }

    /// Set the header length in bytes. Must be a multiple of 4 between 20 and 60.
    pub fn set_header_len(&mut self, len: usize) {
        assert!(len % 4 == 0, "IPv4 header length {len} is not a multiple of 4");
        assert!((IPV4_HEADER_LEN..=60).contains(&len));
        let byte = &mut self.buf_mut()[0];
        *byte = (*byte & 0xf0) | (len / 4) as u8;
    }

    pub fn set_dscp(&mut self, dscp: u8) {
        assert!(dscp < 64);
        let byte = &mut self.buf_mut()[1];
        *byte = (*byte & 0b11) | (dscp << 2);
    }

    pub fn set_ecn(&mut self, ecn: u8) {
        assert!(ecn < 4);
        let byte = &mut self.buf_mut()[1];
        *byte = (*byte & !0b11) | ecn;
    }

    pub fn set_total_len(&mut self, len: u16) {
        write_u16(&mut self.buf_mut()[Field::TotalLen.byte_range()], len);
    }

    pub fn set_ident(&mut self, ident: u16) {
        write_u16(&mut self.buf_mut()[Field::Identification.byte_range()], ident);
    }

    pub fn set_flags(&mut self, flags: Ipv4Flags) {
        let byte = &mut self.buf_mut()[Field::Flags.byte_range().start];
        *byte = (*byte & 0x1f) | (flags.bits() << 5);
    }

    /// Set the fragment offset in units of 8 bytes.
    pub fn set_frag_offset(&mut self, offset: u16) {
        assert!(offset <= FRAG_OFFSET_MASK);
        let range = Field::FragmentOffset.byte_range();
        let flags = read_u16(&self.buf_mut()[range.clone()]) & !FRAG_OFFSET_MASK;
        write_u16(&mut self.buf_mut()[range], flags | offset);
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.buf_mut()[Field::Ttl.byte_range().start] = ttl;
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.buf_mut()[Field::Protocol.byte_range().start] = protocol.into();
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        write_u16(&mut self.buf_mut()[Field::Checksum.byte_range()], checksum);
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.buf_mut()[Field::SrcAddr.byte_range()].copy_from_slice(&addr.octets());
    }

    pub fn set_dst_addr(&mut self, addr: Ipv4Addr) {
        self.buf_mut()[Field::DstAddr.byte_range()].copy_from_slice(&addr.octets());
    }

    /// Compute and store the header checksum. The header length must already be set.
    pub fn fill_checksum(&mut self) {
        let header_len = usize::from(self.buffer.as_ref()[0] & 0x0f) * 4;
        assert!(header_len <= self.buffer.as_ref().len());

        self.set_checksum(0);
        let sum = checksum::ones_complement_sum(&self.buffer.as_ref()[..header_len]);
        self.set_checksum(!sum);
    }

    /// The bytes between the header and the total length. The header length and total length
    /// must already be set.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let buf = self.buffer.as_ref();
        let start = usize::from(buf[0] & 0x0f) * 4;
        let end = usize::from(read_u16(&buf[Field::TotalLen.byte_range()]));
        &mut self.buf_mut()[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> [u8; 20] {
        let mut buf = [0u8; 20];
        let mut ip = Ipv4Builder::new(&mut buf[..]).unwrap();
        ip.set_version(4);
        ip.set_header_len(20);
        ip.set_total_len(20);
        ip.set_ttl(64);
        ip.set_protocol(Protocol::Udp);
        ip.set_src_addr(Ipv4Addr::new(10, 0, 0, 1));
        ip.set_dst_addr(Ipv4Addr::new(1, 2, 3, 4));
        ip.fill_checksum();
        buf
    }

    #[test]
    fn parse_short_buffer() {
        assert_eq!(
            Ipv4Reader::parse(&[0x45u8; 19][..]).unwrap_err(),
            MalformedPacket::Truncated
        );
    }

    #[test]
    fn parse_small_ihl() {
        let mut buf = header();
        buf[0] = 0x44;
        assert_eq!(
            Ipv4Reader::parse(&buf[..]).unwrap_err(),
            MalformedPacket::InconsistentLength
        );
    }

    #[test]
    fn parse_header_longer_than_buffer() {
        let mut buf = header();
        // 24-byte header in a 20-byte buffer
        buf[0] = 0x46;
        buf[3] = 24;
        assert_eq!(
            Ipv4Reader::parse(&buf[..]).unwrap_err(),
            MalformedPacket::Truncated
        );
    }

    #[test]
    fn parse_header_longer_than_total_and_buffer() {
        let mut buf = header();
        // 24-byte header, but the total length only covers 20 bytes
        buf[0] = 0x46;
        buf[3] = 20;
        assert_eq!(
            Ipv4Reader::parse(&buf[..]).unwrap_err(),
            MalformedPacket::InconsistentLength
        );
    }

    #[test]
    fn parse_header_longer_than_total() {
        let mut buf = header();
        buf[3] = 19;
        assert_eq!(
            Ipv4Reader::parse(&buf[..]).unwrap_err(),
            MalformedPacket::InconsistentLength
        );
    }

    #[test]
    fn parse_total_longer_than_buffer() {
        let mut buf = header();
        buf[3] = 21;
        assert_eq!(
            Ipv4Reader::parse(&buf[..]).unwrap_err(),
            MalformedPacket::Truncated
        );
    }

    #[test]
    fn payload_excludes_trailing_padding() {
        let mut buf = [0u8; 30];
        buf[..20].copy_from_slice(&header());
        buf[3] = 24;
        buf[20..24].copy_from_slice(b"abcd");
        buf[24..].copy_from_slice(b"xxxxxx");

        let ip = Ipv4Reader::parse(&buf[..]).unwrap();
        assert_eq!(ip.payload(), b"abcd");
    }

    #[test]
    fn flags_and_frag_offset_share_a_word() {
        let mut buf = header();
        let mut ip = Ipv4Builder::new(&mut buf[..]).unwrap();
        ip.set_frag_offset(0x1abc);
        ip.set_flags(Ipv4Flags::DONT_FRAGMENT);
        ip.set_frag_offset(0x0123);

        let ip = Ipv4Reader::parse(&buf[..]).unwrap();
        assert!(ip.dont_frag());
        assert!(!ip.more_frags());
        assert_eq!(ip.frag_offset(), 0x0123);
        assert_eq!(buf[6], 0x41);
        assert_eq!(buf[7], 0x23);
    }

    #[test]
    fn dscp_and_ecn() {
        let mut buf = header();
        let mut ip = Ipv4Builder::new(&mut buf[..]).unwrap();
        ip.set_dscp(46);
        ip.set_ecn(0b01);

        let ip = Ipv4Reader::parse(&buf[..]).unwrap();
        assert_eq!(ip.dscp(), 46);
        assert_eq!(ip.ecn(), 0b01);
    }

    #[test]
    fn corrupted_header_fails_checksum() {
        let mut buf = header();
        assert!(Ipv4Reader::parse(&buf[..]).unwrap().verify_checksum());

        buf[8] = 63;
        assert!(!Ipv4Reader::parse(&buf[..]).unwrap().verify_checksum());
    }

    #[test]
    fn field_ranges_cover_header() {
        let fields = [
            Field::VersionAndHeaderLen,
            Field::DscpAndEcn,
            Field::TotalLen,
            Field::Identification,
            Field::FragmentOffset,
            Field::Ttl,
            Field::Protocol,
            Field::Checksum,
            Field::SrcAddr,
            Field::DstAddr,
        ];

        let mut next = 0;
        for field in fields {
            let range = field.byte_range();
            assert_eq!(range.start, next, "{field:?}");
            next = range.end;
        }
        assert_eq!(next, IPV4_HEADER_LEN);
    }

    #[test]
    #[should_panic]
    fn header_len_not_multiple_of_four() {
        let mut buf = [0u8; 20];
        Ipv4Builder::new(&mut buf[..]).unwrap().set_header_len(22);
    }
}
