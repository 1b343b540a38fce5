use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::checksum::{ones_complement_sum, verify};
use crate::{Ipv4Builder, Ipv4Reader, UdpReader};

/// Append a checksum word that makes the whole buffer verify. The word goes at an even offset so
/// that it lines up with the 16-bit words of the sum.
fn seal(data: &mut Vec<u8>) {
    if data.len() % 2 == 1 {
        data.push(0);
    }
    data.extend_from_slice(&[0, 0]);
    let sum = !ones_complement_sum(data);
    let len = data.len();
    data[len - 2..].copy_from_slice(&sum.to_be_bytes());
}

#[test]
fn random_buffers_round_trip() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x5eed);

    for _ in 0..1000 {
        let len = rng.gen_range(0..300);
        let mut data = vec![0u8; len];
        rng.fill_bytes(&mut data);

        seal(&mut data);
        assert!(verify(&data), "{data:?}");
    }
}

#[test]
fn random_headers_round_trip() {
    let mut rng = ChaCha20Rng::seed_from_u64(17);

    for _ in 0..1000 {
        let mut buf = [0u8; 20];
        rng.fill_bytes(&mut buf);

        let mut ip = Ipv4Builder::new(&mut buf[..]).unwrap();
        ip.set_header_len(20);
        ip.set_total_len(20);
        ip.fill_checksum();

        assert!(Ipv4Reader::parse(&buf[..]).unwrap().verify_checksum());
    }
}

#[test]
fn random_datagrams_round_trip() {
    let mut rng = ChaCha20Rng::seed_from_u64(1071);

    for _ in 0..500 {
        // odd and even payload lengths
        let len = rng.gen_range(0..200);
        let mut payload = vec![0u8; len];
        rng.fill_bytes(&mut payload);
        let src = (rng.gen::<u32>().into(), rng.gen());
        let dst = (rng.gen::<u32>().into(), rng.gen());

        let frame = super::udp_frame(src, dst, rng.gen(), &payload);
        let ip = Ipv4Reader::parse(&frame[..]).unwrap();
        let udp = UdpReader::parse(ip.payload()).unwrap();
        assert!(ip.verify_checksum());
        assert!(udp.verify_checksum(src.0, dst.0));
        assert_ne!(udp.checksum(), 0);
    }
}

#[test]
fn single_byte_corruption_is_detected() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let original = super::from_hex(super::ALICE_FRAME);

    for _ in 0..200 {
        let mut frame = original.clone();
        // corrupt the UDP header or payload, but not the UDP length
        let i = loop {
            let i = rng.gen_range(20..frame.len());
            if !(24..26).contains(&i) {
                break i;
            }
        };
        frame[i] ^= rng.gen_range(1..=255u8);

        let ip = Ipv4Reader::parse(&frame[..]).unwrap();
        let udp = UdpReader::parse(ip.payload()).unwrap();
        assert!(!udp.verify_checksum(ip.src_addr(), ip.dst_addr()), "byte {i}");
    }
}
