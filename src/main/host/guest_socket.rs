//! A UDP socket for guest programs, shaped like `std::net::UdpSocket`.
//!
//! The engine never blocks, so a receive polls the network and checks the socket's queue over and
//! over until a datagram arrives or the socket's retry budget runs out. Receives go through the
//! engine directly rather than [`net_api::udp_recv_from`], which can't tell an empty queue from an
//! empty datagram.

use std::cell::Cell;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::core::engine::{to_ipv4_endpoint, SendError};
use crate::host::net_api;
use crate::host::session::GuestSession;
use crate::host::socket_table::SocketHandle;

/// The number of poll and receive attempts before a receive gives up.
pub const DEFAULT_RETRY_BUDGET: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuestSocketError {
    Send(SendError),
    /// Nothing arrived within the retry budget.
    ReceiveTimeout,
    /// `send` or `recv` was used on a socket with no peer.
    NotConnected,
    InvalidInput(String),
}

impl std::fmt::Display for GuestSocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(e) => write!(f, "send failed: {e}"),
            Self::ReceiveTimeout => write!(f, "timed out waiting for a datagram"),
            Self::NotConnected => write!(f, "socket is not connected"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for GuestSocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Send(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SendError> for GuestSocketError {
    fn from(e: SendError) -> Self {
        Self::Send(e)
    }
}

/// Something that names a single socket address. Strings must be literal `ip:port` addresses;
/// there is no name resolution.
pub trait ToEndpoint {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError>;
}

impl ToEndpoint for SocketAddr {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError> {
        Ok(*self)
    }
}

impl ToEndpoint for SocketAddrV4 {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError> {
        Ok(SocketAddr::V4(*self))
    }
}

impl ToEndpoint for (Ipv4Addr, u16) {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError> {
        Ok(SocketAddr::V4(SocketAddrV4::new(self.0, self.1)))
    }
}

impl ToEndpoint for str {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError> {
        self.parse()
            .map_err(|e| GuestSocketError::InvalidInput(format!("{self:?}: {e}")))
    }
}

impl ToEndpoint for String {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError> {
        self.as_str().to_endpoint()
    }
}

impl<T: ToEndpoint + ?Sized> ToEndpoint for &T {
    fn to_endpoint(&self) -> Result<SocketAddr, GuestSocketError> {
        (**self).to_endpoint()
    }
}

/// A bound UDP socket. Dropping it unbinds it.
pub struct GuestUdpSocket<'s, 'e> {
    session: &'s GuestSession<'e>,
    handle: u64,
    peer: Cell<Option<SocketAddrV4>>,
    retry_budget: Cell<u32>,
}

impl<'s, 'e> GuestUdpSocket<'s, 'e> {
    pub(crate) fn new(session: &'s GuestSession<'e>, handle: u64) -> Self {
        Self {
            session,
            handle,
            peer: Cell::new(None),
            retry_budget: Cell::new(DEFAULT_RETRY_BUDGET),
        }
    }

    /// The handle the engine knows this socket by.
    pub fn raw_handle(&self) -> u64 {
        self.handle
    }

    pub fn local_addr(&self) -> Result<SocketAddr, GuestSocketError> {
        let handle = self.socket_handle();
        self.session
            .with_engine(|engine| engine.local_addr(handle))
            .map(SocketAddr::V4)
            .ok_or(GuestSocketError::Send(SendError::UnknownSocket))
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, GuestSocketError> {
        self.peer
            .get()
            .map(SocketAddr::V4)
            .ok_or(GuestSocketError::NotConnected)
    }

    /// Set the number of poll and receive attempts a receive makes before timing out. A budget of
    /// 0 is treated as 1.
    pub fn set_retry_budget(&self, budget: u32) {
        self.retry_budget.set(budget.max(1));
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget.get()
    }

    /// Set the default destination for `send`, and only accept datagrams from it in `recv`.
    pub fn connect(&self, addr: impl ToEndpoint) -> Result<(), GuestSocketError> {
        let peer = to_ipv4_endpoint(addr.to_endpoint()?).ok_or(SendError::InvalidAddress)?;
        self.peer.set(Some(peer));
        Ok(())
    }

    pub fn send_to(&self, buf: &[u8], addr: impl ToEndpoint) -> Result<usize, GuestSocketError> {
        let dst = to_ipv4_endpoint(addr.to_endpoint()?).ok_or(SendError::InvalidAddress)?;
        self.session.with_engine(|engine| {
            net_api::udp_send_to(
                engine,
                self.handle,
                buf,
                u32::from(*dst.ip()),
                dst.port(),
            )
        })?;
        Ok(buf.len())
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize, GuestSocketError> {
        let peer = self.peer.get().ok_or(GuestSocketError::NotConnected)?;
        self.send_to(buf, peer)
    }

    /// Receive a datagram from any source. A datagram longer than `buf` is truncated.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), GuestSocketError> {
        self.recv_matching(buf, |_| true)
            .map(|(len, src)| (len, SocketAddr::V4(src)))
    }

    /// Receive a datagram from the connected peer. Datagrams from other sources are discarded.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, GuestSocketError> {
        let peer = self.peer.get().ok_or(GuestSocketError::NotConnected)?;
        self.recv_matching(buf, |src| src == peer)
            .map(|(len, _)| len)
    }

    fn recv_matching(
        &self,
        buf: &mut [u8],
        accept: impl Fn(SocketAddrV4) -> bool,
    ) -> Result<(usize, SocketAddrV4), GuestSocketError> {
        let handle = self.socket_handle();

        for _ in 0..self.retry_budget.get() {
            self.session.poll();

            // drain everything that has arrived before polling again
            while let Some((payload, src)) = self.session.with_engine(|x| x.recv_from(handle)) {
                if !accept(src) {
                    log::trace!("Discarding datagram from unconnected peer {src}");
                    continue;
                }

                let len = std::cmp::min(payload.len(), buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                return Ok((len, src));
            }
        }

        Err(GuestSocketError::ReceiveTimeout)
    }

    fn socket_handle(&self) -> SocketHandle {
        SocketHandle::from_raw(self.handle)
    }
}

impl Drop for GuestUdpSocket<'_, '_> {
    fn drop(&mut self) {
        self.session.release(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::Engine;
    use crate::network::policy::name_server::NameServerBuilder;
    use crate::network::policy::Scenario;

    fn name_server_engine() -> Engine {
        let mut builder = NameServerBuilder::new();
        builder.fixed_answer(Ipv4Addr::new(5, 6, 7, 8));
        let server = builder.build("1.2.3.4:53".parse().unwrap());
        Engine::new(Scenario::fully_connected().with_rule(server))
    }

    #[test]
    fn resolve_a_name() {
        let mut engine = name_server_engine();
        let session = GuestSession::new(&mut engine);

        let socket = session.bind("10.0.0.1:1000").unwrap();
        assert_eq!(socket.send_to(b"Alice", "1.2.3.4:53").unwrap(), 5);

        let mut response = [0u8; 4];
        let (size, sender) = socket.recv_from(&mut response).unwrap();

        assert_eq!(size, 4);
        assert_eq!(Ipv4Addr::from(response), Ipv4Addr::new(5, 6, 7, 8));
        assert_eq!(sender, "1.2.3.4:53".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn receive_timeout() {
        let mut engine = Engine::default();
        let session = GuestSession::new(&mut engine);

        let socket = session.bind("10.0.0.1:1000").unwrap();
        socket.set_retry_budget(3);
        let mut buf = [0u8; 8];
        assert_eq!(
            socket.recv_from(&mut buf),
            Err(GuestSocketError::ReceiveTimeout)
        );
    }

    #[test]
    fn connected_sockets() {
        let mut engine = Engine::default();
        let session = GuestSession::new(&mut engine);

        let a = session.bind("10.0.0.1:1000").unwrap();
        let b = session.bind("10.0.0.2:2000").unwrap();
        let c = session.bind("10.0.0.3:3000").unwrap();

        assert_eq!(a.send(b"x"), Err(GuestSocketError::NotConnected));
        assert_eq!(a.peer_addr(), Err(GuestSocketError::NotConnected));

        // an unconnected socket can't recv even when a datagram is waiting
        b.send_to(b"early", "10.0.0.1:1000").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(a.recv(&mut buf), Err(GuestSocketError::NotConnected));
        let (n, _) = a.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"early");

        a.connect("10.0.0.2:2000").unwrap();
        c.send_to(b"from c", "10.0.0.1:1000").unwrap();
        b.send_to(b"from b", "10.0.0.1:1000").unwrap();

        // the datagram from c arrives first but is skipped
        let n = a.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"from b");

        a.send(b"reply").unwrap();
        let (n, src) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"reply");
        assert_eq!(src, a.local_addr().unwrap());
    }

    #[test]
    fn empty_datagram() {
        let mut engine = Engine::default();
        let session = GuestSession::new(&mut engine);

        let a = session.bind("10.0.0.1:1000").unwrap();
        a.send_to(b"", "10.0.0.1:1000").unwrap();

        let mut buf = [0u8; 4];
        let (n, src) = a.recv_from(&mut buf).unwrap();
        assert_eq!(n, 0);
        assert_eq!(src, a.local_addr().unwrap());
    }

    #[test]
    fn invalid_addresses() {
        let mut engine = Engine::default();
        let session = GuestSession::new(&mut engine);
        let a = session.bind("10.0.0.1:0").unwrap();
        assert_eq!(a.local_addr().unwrap().port(), 10000);

        assert!(matches!(
            a.send_to(b"x", "name-server:53"),
            Err(GuestSocketError::InvalidInput(_))
        ));
        assert_eq!(
            a.send_to(b"x", "0.0.0.0:53"),
            Err(GuestSocketError::Send(SendError::InvalidAddress))
        );
        assert_eq!(
            a.connect("[::1]:53"),
            Err(GuestSocketError::Send(SendError::InvalidAddress))
        );
    }

    #[test]
    fn drop_unbinds() {
        let mut engine = Engine::default();
        let session = GuestSession::new(&mut engine);

        let a = session.bind("10.0.0.1:1000").unwrap();
        let handle = a.raw_handle();
        drop(a);

        assert_eq!(session.bound_count(), 0);
        let bound = session.with_engine(|x| x.local_addr(SocketHandle::from_raw(handle)));
        assert_eq!(bound, None);
    }
}
