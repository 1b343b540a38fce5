//! Tests that exercise the codecs together. Per-module edge cases live next to each module.

mod checksum;

use std::net::Ipv4Addr;

use crate::{Ipv4Builder, Protocol, UdpBuilder, IPV4_HEADER_LEN, UDP_HEADER_LEN};

/// The frame sent by `10.0.0.1:1000` to `1.2.3.4:53` with payload "Alice", as captured.
const ALICE_FRAME: &str = "450000210000000040116cc60a0000010102030403e80035000ddde0416c696365";

pub fn from_hex(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0);
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

/// Build an IPv4/UDP frame the same way the engine does.
pub fn udp_frame(
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    ident: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IPV4_HEADER_LEN + udp_len;
    let mut buf = vec![0u8; total_len];

    let mut udp = UdpBuilder::new(&mut buf[IPV4_HEADER_LEN..]).unwrap();
    udp.set_src_port(src.1);
    udp.set_dst_port(dst.1);
    udp.set_len(udp_len.try_into().unwrap());
    udp.payload_mut().copy_from_slice(payload);
    udp.fill_checksum(src.0, dst.0);

    let mut ip = Ipv4Builder::new(&mut buf[..]).unwrap();
    ip.set_version(4);
    ip.set_header_len(IPV4_HEADER_LEN);
    ip.set_total_len(total_len.try_into().unwrap());
    ip.set_ident(ident);
    ip.set_ttl(64);
    ip.set_protocol(Protocol::Udp);
    ip.set_src_addr(src.0);
    ip.set_dst_addr(dst.0);
    ip.fill_checksum();

    buf
}
