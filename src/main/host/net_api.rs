//! The calls a sandboxed guest makes into the network. Addresses are host-order `u32` IPv4
//! addresses and sockets are raw integer handles, which is what crosses the sandbox boundary.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::core::engine::{Engine, SendError};
use crate::host::socket_table::SocketHandle;

/// Bind a socket and return its handle. Binding never fails.
pub fn udp_bind(engine: &mut Engine, ip: u32, port: u16) -> u64 {
    let handle = engine.bind(SocketAddrV4::new(Ipv4Addr::from(ip), port));
    handle.as_raw()
}

/// Unbinding a handle that is not bound does nothing.
pub fn udp_unbind(engine: &mut Engine, handle: u64) {
    engine.unbind(SocketHandle::from_raw(handle));
}

pub fn udp_send_to(
    engine: &mut Engine,
    handle: u64,
    buf: &[u8],
    dst_ip: u32,
    dst_port: u16,
) -> Result<(), SendError> {
    let dst = SocketAddrV4::new(Ipv4Addr::from(dst_ip), dst_port);
    engine.send_to(SocketHandle::from_raw(handle), buf, dst)
}

/// Copy the oldest waiting datagram into `buf` and write its source to `out_src_ip` and
/// `out_src_port`. A datagram longer than `buf` is truncated and the rest of it is discarded.
/// Returns the number of bytes copied, or 0 if nothing is waiting (the outputs are then left
/// unchanged).
pub fn udp_recv_from(
    engine: &mut Engine,
    handle: u64,
    buf: &mut [u8],
    out_src_ip: &mut u32,
    out_src_port: &mut u16,
) -> usize {
    let Some((payload, src)) = engine.recv_from(SocketHandle::from_raw(handle)) else {
        return 0;
    };

    let len = std::cmp::min(payload.len(), buf.len());
    if len < payload.len() {
        log::debug!(
            "Truncating {} byte datagram from {src} to {len} bytes",
            payload.len()
        );
    }
    buf[..len].copy_from_slice(&payload[..len]);

    *out_src_ip = u32::from(*src.ip());
    *out_src_port = src.port();

    len
}

/// Returns the number of frames delivered.
pub fn poll_network(engine: &mut Engine) -> usize {
    engine.poll()
}

pub fn report_milestone(engine: &mut Engine, name: &str) {
    engine.report_milestone(name);
}
