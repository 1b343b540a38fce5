use std::io::Write;
use std::net::SocketAddrV4;

use bytes::Bytes;
use vnet_wire::{
    DecodedPacket, Ipv4Builder, Ipv4Reader, Ipv4View, MalformedPacket, Protocol, UdpBuilder,
    UdpReader, IPV4_HEADER_LEN, MAX_UDP_PAYLOAD_LEN, UDP_HEADER_LEN,
};

use crate::utility::pcap_writer::PacketDisplay;

/// Represents different checkpoints that a frame reaches as it moves through the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketStatus {
    SndCreated,
    OutboxQueued,
    PolicyDropped,
    PolicyDeferred,
    PolicyDuplicated,
    ReplySynthesized,
    RcvSocketBuffered,
    RcvNoSocketDropped,
    RcvSocketDelivered,
}

/// A complete IPv4/UDP frame as it would appear on the wire: a 20-byte IPv4 header, an 8-byte UDP
/// header, and the payload.
///
/// A `Frame` is read-only after creation. Cloning a frame is cheap since the bytes are reference
/// counted, so a frame can be delivered to several sockets (ex: when duplicated) and handed to
/// observers without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    src: SocketAddrV4,
    dst: SocketAddrV4,
}

impl Frame {
    /// Encode a UDP datagram from `src` to `dst`. Returns `None` if the payload would make the
    /// IPv4 packet longer than 65535 bytes.
    pub fn new_ipv4_udp(
        src: SocketAddrV4,
        dst: SocketAddrV4,
        payload: &[u8],
        ident: u16,
        ttl: u8,
    ) -> Option<Self> {
        if payload.len() > MAX_UDP_PAYLOAD_LEN {
            return None;
        }

        let udp_len = UDP_HEADER_LEN + payload.len();
        let total_len = IPV4_HEADER_LEN + udp_len;
        let mut buf = vec![0u8; total_len];

        // both lengths fit in a u16 since the payload length was checked above
        let mut udp = UdpBuilder::new(&mut buf[IPV4_HEADER_LEN..]).ok()?;
        udp.set_src_port(src.port());
        udp.set_dst_port(dst.port());
        udp.set_len(udp_len as u16);
        udp.payload_mut().copy_from_slice(payload);
        udp.fill_checksum(*src.ip(), *dst.ip());

        let mut ip = Ipv4Builder::new(&mut buf[..]).ok()?;
        ip.set_version(4);
        ip.set_header_len(IPV4_HEADER_LEN);
        ip.set_total_len(total_len as u16);
        ip.set_ident(ident);
        ip.set_ttl(ttl);
        ip.set_protocol(Protocol::Udp);
        ip.set_src_addr(*src.ip());
        ip.set_dst_addr(*dst.ip());
        ip.fill_checksum();

        Some(Self {
            data: Bytes::from(buf),
            src,
            dst,
        })
    }

    pub fn src_address(&self) -> SocketAddrV4 {
        self.src
    }

    pub fn dst_address(&self) -> SocketAddrV4 {
        self.dst
    }

    /// The encoded frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The total frame length, which is also the IPv4 total length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The UDP payload. Shares the frame's memory.
    pub fn payload(&self) -> Bytes {
        self.data.slice(IPV4_HEADER_LEN + UDP_HEADER_LEN..)
    }

    pub fn payload_len(&self) -> usize {
        self.data.len() - IPV4_HEADER_LEN - UDP_HEADER_LEN
    }

    /// A view of the IPv4 header.
    pub fn ipv4(&self) -> Ipv4View<'_> {
        // the frame was encoded by us, so it's always a valid packet
        Ipv4Reader::parse(&self.data[..]).unwrap()
    }

    /// A view of the UDP header.
    pub fn udp(&self) -> UdpReader<&[u8]> {
        UdpReader::parse(&self.data[IPV4_HEADER_LEN..]).unwrap()
    }

    pub fn decode(&self) -> Result<DecodedPacket, MalformedPacket> {
        vnet_wire::decode_frame(&self.data)
    }

    /// Log the frame with the given status. This function has no effect unless
    /// `log::Level::Trace` is enabled.
    pub fn add_status(&self, status: PacketStatus) {
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("[{status:?}] {self:?}");
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("ident", &self.ipv4().ident())
            .field("payload_len", &self.payload_len())
            .finish()
    }
}

impl PacketDisplay for Frame {
    fn display_bytes(&self, mut writer: impl Write) -> std::io::Result<()> {
        writer.write_all(&self.data)
    }

    fn display_len(&self) -> usize {
        self.data.len()
    }
}

/// A frame waiting in the outbox for the next poll.
#[derive(Clone, Debug)]
pub struct PendingFrame {
    pub frame: Frame,
    pub from: SocketAddrV4,
    pub to: SocketAddrV4,
    /// Assigned from a counter when the frame enters the outbox. Frames are resolved in
    /// ascending sequence order.
    pub sequence: u64,
    /// The number of times the policy has deferred this frame.
    pub attempt: u32,
    /// Zero for frames sent by a guest. A synthesized reply has the hop of the frame it answers
    /// plus one.
    pub hop: u8,
}

impl PendingFrame {
    pub fn new(frame: Frame, sequence: u64, hop: u8) -> Self {
        Self {
            from: frame.src_address(),
            to: frame.dst_address(),
            frame,
            sequence,
            attempt: 0,
            hop,
        }
    }
}
