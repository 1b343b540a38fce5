//! The RFC 1071 one's-complement checksum used by the IPv4, UDP and ICMP headers.
//!
//! None of these functions invert their result. A header's stored checksum is the complement of
//! the sum computed with the checksum field zeroed, so summing the stored header (checksum
//! included) gives `0xffff` when it is intact.

use std::net::Ipv4Addr;

use crate::Protocol;

/// Folds the carries above bit 16 back into the low 16 bits until none remain.
fn propagate_carries(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    (sum & 0xffff) as u16
}

/// Sum `data` as a sequence of big-endian 16-bit words. An odd trailing byte is the high byte of
/// a final word padded with zero.
pub fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);

    let mut accum: u64 = words
        .by_ref()
        .map(|word| u64::from(u16::from_be_bytes([word[0], word[1]])))
        .sum();

    if let [last] = words.remainder() {
        accum += u64::from(*last) << 8;
    }

    propagate_carries(accum)
}

/// Combine partial sums (each already the output of [`ones_complement_sum`]) into one.
pub fn combine(words: &[u16]) -> u16 {
    propagate_carries(words.iter().copied().map(u64::from).sum())
}

/// The checksum contribution of the 12-byte IPv4 pseudo-header used by UDP: source address,
/// destination address, a zero byte, the protocol number and the UDP length.
pub fn pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: Protocol, length: u16) -> u16 {
    let mut proto_len = [0u8; 4];
    proto_len[1] = protocol.into();
    proto_len[2..].copy_from_slice(&length.to_be_bytes());

    combine(&[
        ones_complement_sum(&src.octets()),
        ones_complement_sum(&dst.octets()),
        ones_complement_sum(&proto_len),
    ])
}

/// Returns true if `data`, which includes its own stored checksum, sums to all-ones.
pub fn verify(data: &[u8]) -> bool {
    ones_complement_sum(data) == 0xffff
}
