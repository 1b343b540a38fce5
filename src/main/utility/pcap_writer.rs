use std::io::Write;

/// The pcap data link type for packets that begin with an IPv4 or IPv6 header.
// https://www.tcpdump.org/linktypes.html
const LINKTYPE_RAW: u32 = 101;

/// Writes packets in the classic libpcap file format.
pub struct PcapWriter<W: Write> {
    writer: W,
    capture_len: u32,
}

impl<W: Write> PcapWriter<W> {
    /// A new packet capture writer. Each packet captured will be truncated to a length
    /// `capture_len`.
    pub fn new(writer: W, capture_len: u32) -> std::io::Result<Self> {
        let mut rv = PcapWriter {
            writer,
            capture_len,
        };

        rv.write_header()?;

        Ok(rv)
    }

    fn write_header(&mut self) -> std::io::Result<()> {
        // magic number to show endianness
        const MAGIC_NUMBER: u32 = 0xA1B2C3D4;
        const VERSION_MAJOR: u16 = 2;
        const VERSION_MINOR: u16 = 4;
        // GMT to local correction
        const THIS_ZONE: i32 = 0;
        // accuracy of timestamps
        const SIG_FLAGS: u32 = 0;

        self.writer.write_all(&MAGIC_NUMBER.to_ne_bytes())?;
        self.writer.write_all(&VERSION_MAJOR.to_ne_bytes())?;
        self.writer.write_all(&VERSION_MINOR.to_ne_bytes())?;
        self.writer.write_all(&THIS_ZONE.to_ne_bytes())?;
        self.writer.write_all(&SIG_FLAGS.to_ne_bytes())?;
        // snapshot length
        self.writer.write_all(&self.capture_len.to_ne_bytes())?;
        self.writer.write_all(&LINKTYPE_RAW.to_ne_bytes())?;

        Ok(())
    }

    /// Write a packet from a buffer.
    pub fn write_packet(
        &mut self,
        ts_sec: u32,
        ts_usec: u32,
        packet: &[u8],
    ) -> std::io::Result<()> {
        let packet_len = u32::try_from(packet.len()).unwrap_or(u32::MAX);
        let packet_trunc_len = std::cmp::min(packet_len, self.capture_len);

        self.writer.write_all(&ts_sec.to_ne_bytes())?;
        self.writer.write_all(&ts_usec.to_ne_bytes())?;
        // captured packet length
        self.writer.write_all(&packet_trunc_len.to_ne_bytes())?;
        // original packet length
        self.writer.write_all(&packet_len.to_ne_bytes())?;

        self.writer
            .write_all(&packet[..(packet_trunc_len as usize)])?;

        Ok(())
    }

    /// Write a packet that knows how to render its own bytes.
    pub fn write_display(
        &mut self,
        ts_sec: u32,
        ts_usec: u32,
        packet: &impl PacketDisplay,
    ) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(packet.display_len());
        packet.display_bytes(&mut buf)?;
        self.write_packet(ts_sec, ts_usec, &buf)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

pub trait PacketDisplay {
    /// Write the packet bytes.
    fn display_bytes(&self, writer: impl Write) -> std::io::Result<()>;

    /// The number of bytes that `display_bytes` will write.
    fn display_len(&self) -> usize;
}
