use std::net::SocketAddrV4;

use vnet::core::engine::{Engine, EngineConfig, SendError};
use vnet::host::socket_table::SocketHandle;
use vnet::network::capture::CaptureLog;
use vnet::network::policy::rules::{Duplicate, FlowFilter, HoldBack};
use vnet::network::policy::{DeliveryDecision, ReplyBuilder, Scenario};
use vnet::wire::MAX_UDP_PAYLOAD_LEN;

fn addr(s: &str) -> SocketAddrV4 {
    s.parse().unwrap()
}

fn recv_all(engine: &mut Engine, handle: SocketHandle) -> Vec<Vec<u8>> {
    std::iter::from_fn(|| engine.recv_from(handle))
        .map(|(payload, _)| payload.to_vec())
        .collect()
}

#[test]
fn delivery_is_in_send_order() {
    let mut engine = Engine::default();
    let a = engine.bind(addr("10.0.0.1:1000"));
    let b = engine.bind(addr("10.0.0.2:2000"));
    let c = engine.bind(addr("10.0.0.3:3000"));

    engine.send_to(a, b"A", addr("10.0.0.3:3000")).unwrap();
    engine.send_to(b, b"B", addr("10.0.0.3:3000")).unwrap();
    engine.send_to(a, b"A2", addr("10.0.0.3:3000")).unwrap();

    // nothing moves until the network is polled
    assert_eq!(engine.inbound_len(c), Some(0));
    assert_eq!(engine.pending(), 3);

    assert_eq!(engine.poll(), 3);
    assert_eq!(engine.pending(), 0);

    let (payload, src) = engine.recv_from(c).unwrap();
    assert_eq!(&payload[..], b"A");
    assert_eq!(src, addr("10.0.0.1:1000"));

    let (payload, src) = engine.recv_from(c).unwrap();
    assert_eq!(&payload[..], b"B");
    assert_eq!(src, addr("10.0.0.2:2000"));

    assert_eq!(recv_all(&mut engine, c), [b"A2".to_vec()]);
}

#[test]
fn frames_to_unbound_endpoints_are_dropped() {
    let mut engine = Engine::default();
    let a = engine.bind(addr("10.0.0.1:1000"));

    engine.send_to(a, b"hello", addr("10.0.0.9:9")).unwrap();
    assert_eq!(engine.poll(), 0);
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.inbound_len(a), Some(0));

    let stats = engine.stats();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dropped_no_socket, 1);
}

#[test]
fn unbind_discards_queued_datagrams() {
    let mut engine = Engine::default();
    let a = engine.bind(addr("10.0.0.1:1000"));
    let b = engine.bind(addr("10.0.0.2:2000"));

    engine.send_to(a, b"first", addr("10.0.0.2:2000")).unwrap();
    engine.send_to(a, b"second", addr("10.0.0.2:2000")).unwrap();
    engine.poll();
    assert_eq!(engine.inbound_len(b), Some(2));

    assert!(engine.unbind(b));
    assert!(!engine.unbind(b));
    assert_eq!(engine.recv_from(b), None);
    assert_eq!(engine.send_to(b, b"x", addr("10.0.0.1:1000")), Err(SendError::UnknownSocket));

    // a new socket on the same endpoint starts with an empty queue
    let b = engine.bind(addr("10.0.0.2:2000"));
    assert_eq!(engine.recv_from(b), None);

    engine.send_to(a, b"third", addr("10.0.0.2:2000")).unwrap();
    engine.poll();
    assert_eq!(recv_all(&mut engine, b), [b"third".to_vec()]);
}

#[test]
fn oversized_payloads_are_rejected() {
    let log = CaptureLog::new();
    let mut engine = Engine::default();
    engine.add_observer(log.clone());
    let a = engine.bind(addr("10.0.0.1:1000"));
    let b = engine.bind(addr("10.0.0.2:2000"));

    for len in [MAX_UDP_PAYLOAD_LEN + 1, 65528] {
        let payload = vec![0u8; len];
        assert_eq!(
            engine.send_to(a, &payload, addr("10.0.0.2:2000")),
            Err(SendError::PacketTooLarge)
        );
    }
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.stats().sent, 0);
    assert!(log.is_empty());

    // the largest payload that fits
    let payload = vec![0xab; MAX_UDP_PAYLOAD_LEN];
    engine.send_to(a, &payload, addr("10.0.0.2:2000")).unwrap();
    assert_eq!(log.frames()[0].1.len(), usize::from(u16::MAX));

    engine.poll();
    let (received, _) = engine.recv_from(b).unwrap();
    assert_eq!(received.len(), MAX_UDP_PAYLOAD_LEN);
}

#[test]
fn frame_lengths_match_payloads() {
    let log = CaptureLog::new();
    let mut engine = Engine::default();
    engine.add_observer(log.clone());
    let a = engine.bind(addr("10.0.0.1:1000"));

    let lens = [0, 1, 5, 100, 1472, 9000];
    for len in lens {
        engine.send_to(a, &vec![7u8; len], addr("10.0.0.2:2000")).unwrap();
    }

    let frames = log.frames();
    assert_eq!(frames.len(), lens.len());

    for ((sequence, frame), len) in frames.iter().zip(lens) {
        let decoded = Engine::decode_frame(frame.as_bytes()).unwrap();
        let udp = decoded.udp().unwrap();

        assert_eq!(frame.len(), 28 + len, "frame {sequence}");
        assert_eq!(usize::from(decoded.ip().total_len), 28 + len);
        assert_eq!(usize::from(udp.len), 8 + len);
        assert_eq!(udp.payload.len(), len);
        assert!(decoded.checksums_valid());
    }
}

#[test]
fn first_frame_encoding() {
    let log = CaptureLog::new();
    let mut engine = Engine::default();
    engine.add_observer(log.clone());

    let a = engine.bind(addr("10.0.0.1:1000"));
    engine.send_to(a, b"Alice", addr("1.2.3.4:53")).unwrap();

    let expected: Vec<u8> = [
        "45000021", "00000000", "40116cc6", "0a000001", "01020304", "03e80035", "000ddde0",
        "416c6963", "65",
    ]
    .concat()
    .as_bytes()
    .chunks(2)
    .map(|x| u8::from_str_radix(std::str::from_utf8(x).unwrap(), 16).unwrap())
    .collect();

    let frames = log.frames();
    assert_eq!(frames[0].0, 0);
    assert_eq!(frames[0].1.as_bytes(), expected.as_slice());

    // the identification field counts frames
    engine.send_to(a, b"Alice", addr("1.2.3.4:53")).unwrap();
    let decoded = Engine::decode_frame(log.frames()[1].1.as_bytes()).unwrap();
    assert_eq!(decoded.ip().ident, 1);
}

#[test]
fn held_back_frames_arrive_late() {
    let policy = Scenario::fully_connected().with_rule(HoldBack::new(FlowFilter::any(), 2));
    let mut engine = Engine::new(policy);
    let a = engine.bind(addr("10.0.0.1:1000"));
    let b = engine.bind(addr("10.0.0.2:2000"));

    for payload in [b"1", b"2", b"3"] {
        engine.send_to(a, payload, addr("10.0.0.2:2000")).unwrap();
    }

    assert_eq!(engine.poll(), 2);
    assert_eq!(engine.pending(), 1);
    assert_eq!(engine.poll(), 1);

    assert_eq!(recv_all(&mut engine, b), [b"1".to_vec(), b"3".to_vec(), b"2".to_vec()]);
    assert_eq!(engine.stats().deferred, 1);
}

#[test]
fn deferral_is_capped() {
    let config = EngineConfig {
        max_defer_attempts: 3,
        ..Default::default()
    };
    let mut engine = Engine::with_config(config, |_: SocketAddrV4, _: SocketAddrV4, _: u32| {
        DeliveryDecision::Defer
    });
    let a = engine.bind(addr("10.0.0.1:1000"));
    engine.bind(addr("10.0.0.2:2000"));

    engine.send_to(a, b"never", addr("10.0.0.2:2000")).unwrap();

    for _ in 0..3 {
        assert_eq!(engine.poll(), 0);
        assert_eq!(engine.pending(), 1);
    }

    // the fourth deferral drops the frame
    assert_eq!(engine.poll(), 0);
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.stats().deferred, 3);
    assert_eq!(engine.stats().dropped_by_policy, 1);
}

#[test]
fn duplicated_frames() {
    let filter = FlowFilter::sent_to(addr("10.0.0.2:2000"));
    let policy = Scenario::fully_connected().with_rule(Duplicate::new(filter, 3));
    let mut engine = Engine::new(policy);
    let a = engine.bind(addr("10.0.0.1:1000"));
    let b = engine.bind(addr("10.0.0.2:2000"));

    engine.send_to(a, b"echo", addr("10.0.0.2:2000")).unwrap();
    engine.send_to(b, b"once", addr("10.0.0.1:1000")).unwrap();
    assert_eq!(engine.poll(), 4);

    assert_eq!(recv_all(&mut engine, b).len(), 3);
    assert_eq!(recv_all(&mut engine, a), [b"once".to_vec()]);
    assert_eq!(engine.stats().duplicated, 2);
}

#[test]
fn replies_to_replies_are_suppressed() {
    let server = addr("10.0.0.9:7");
    let client = addr("10.0.0.1:1000");

    // answer everything, including the replies themselves
    let policy = move |_from: SocketAddrV4, _to: SocketAddrV4, _attempt: u32| {
        DeliveryDecision::DeliverAndReply(ReplyBuilder::new(|request| request.to_ascii_uppercase()))
    };

    let mut engine = Engine::new(policy);
    let a = engine.bind(client);
    engine.send_to(a, b"ping", server).unwrap();

    // the request has no socket, the reply is delivered and its own reply is suppressed
    assert_eq!(engine.poll(), 1);
    let (payload, src) = engine.recv_from(a).unwrap();
    assert_eq!(&payload[..], b"PING");
    assert_eq!(src, server);

    let stats = engine.stats();
    assert_eq!(stats.replies, 1);
    assert_eq!(stats.dropped_no_socket, 1);
    assert_eq!(engine.pending(), 0);

    // a second level of replies is allowed with a higher cap
    let config = EngineConfig {
        max_synthetic_hops: 2,
        ..Default::default()
    };
    let mut engine = Engine::with_config(config, policy);
    let a = engine.bind(client);
    let s = engine.bind(server);
    engine.send_to(a, b"ping", server).unwrap();
    engine.poll();

    assert_eq!(engine.stats().replies, 2);
    assert_eq!(recv_all(&mut engine, s), [b"ping".to_vec(), b"PING".to_vec()]);
    assert_eq!(recv_all(&mut engine, a), [b"PING".to_vec()]);

    // replies are not counted as sent by a guest
    assert_eq!(engine.stats().sent, 1);
}
