use std::cell::RefCell;
use std::net::IpAddr;

use crate::core::engine::Engine;
use crate::host::guest_socket::{GuestSocketError, GuestUdpSocket, ToEndpoint};
use crate::host::net_api;

/// One run of a guest program against an engine.
///
/// Every socket bound through the session is released when the session ends, even if the guest
/// leaked the socket or panicked before closing it. The engine outlives the session, so the
/// frames and statistics it produced can still be inspected afterwards.
pub struct GuestSession<'e> {
    engine: RefCell<&'e mut Engine>,
    // raw handles, as seen by the guest
    bound: RefCell<Vec<u64>>,
}

impl<'e> GuestSession<'e> {
    pub fn new(engine: &'e mut Engine) -> Self {
        Self {
            engine: RefCell::new(engine),
            bound: RefCell::new(Vec::new()),
        }
    }

    /// Bind a UDP socket. Port 0 picks a free port.
    pub fn bind(
        &self,
        addr: impl ToEndpoint,
    ) -> Result<GuestUdpSocket<'_, 'e>, GuestSocketError> {
        let addr = addr.to_endpoint()?;
        let IpAddr::V4(ip) = addr.ip() else {
            return Err(GuestSocketError::InvalidInput(format!(
                "{addr} is not an IPv4 address"
            )));
        };

        let handle =
            self.with_engine(|engine| net_api::udp_bind(engine, u32::from(ip), addr.port()));
        self.bound.borrow_mut().push(handle);

        Ok(GuestUdpSocket::new(self, handle))
    }

    /// Run `f` with the engine. Must not be called from within `f`.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut engine = self.engine.borrow_mut();
        f(&mut **engine)
    }

    pub fn poll(&self) -> usize {
        self.with_engine(net_api::poll_network)
    }

    pub fn report_milestone(&self, name: &str) {
        self.with_engine(|engine| net_api::report_milestone(engine, name));
    }

    /// The number of sockets bound through this session and not yet released.
    pub fn bound_count(&self) -> usize {
        self.bound.borrow().len()
    }

    /// Unbind a socket bound through this session.
    pub(crate) fn release(&self, handle: u64) {
        self.bound.borrow_mut().retain(|x| *x != handle);
        self.with_engine(|engine| net_api::udp_unbind(engine, handle));
    }

    /// End the session, releasing every socket that is still bound.
    pub fn end(self) {
        // the work is done on drop
    }
}

impl Drop for GuestSession<'_> {
    fn drop(&mut self) {
        let bound = std::mem::take(self.bound.get_mut());
        if !bound.is_empty() {
            log::debug!("Releasing {} sockets left bound by the guest", bound.len());
        }

        let engine = self.engine.get_mut();
        for handle in bound {
            net_api::udp_unbind(engine, handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;

    #[test]
    fn end_releases_sockets() {
        let mut engine = Engine::default();

        let session = GuestSession::new(&mut engine);
        let a = session.bind("10.0.0.1:1000").unwrap();
        let b = session.bind("10.0.0.2:1000").unwrap();
        assert_eq!(session.bound_count(), 2);

        // a leaked socket is still released by the session
        std::mem::forget(a);
        drop(b);
        assert_eq!(session.bound_count(), 1);
        assert_eq!(session.with_engine(|x| x.socket_count()), 1);

        session.end();
        assert_eq!(engine.socket_count(), 0);
    }

    #[test]
    fn panicking_guest() {
        let mut engine = Engine::default();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let session = GuestSession::new(&mut engine);
            let socket = session.bind("10.0.0.1:1000").unwrap();
            std::mem::forget(socket);
            panic!("guest panicked");
        }));

        assert!(result.is_err());
        assert_eq!(engine.socket_count(), 0);
        let endpoint = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1000);
        assert_eq!(engine.lookup_by_endpoint(endpoint), None);
    }

    #[test]
    fn ipv6_bind() {
        let mut engine = Engine::default();
        let session = GuestSession::new(&mut engine);
        assert!(matches!(
            session.bind("[::1]:1000"),
            Err(GuestSocketError::InvalidInput(_))
        ));
        assert_eq!(session.bound_count(), 0);
    }
}
