//! The registry of bound UDP endpoints and their inbound queues.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use crate::network::packet::Frame;

/// An opaque identifier for a bound socket. Handles are never reused within one table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketHandle(u64);

impl SocketHandle {
    /// Reconstruct a handle from the integer given to a guest.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Frames delivered to a socket and not yet received, oldest first.
#[derive(Debug, Default)]
pub struct InboundQueue {
    frames: VecDeque<(Frame, SocketAddrV4)>,
}

impl InboundQueue {
    pub fn push(&mut self, frame: Frame, from: SocketAddrV4) {
        self.frames.push_back((frame, from));
    }

    pub fn pop(&mut self) -> Option<(Frame, SocketAddrV4)> {
        self.frames.pop_front()
    }

    pub fn peek(&self) -> Option<&(Frame, SocketAddrV4)> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug)]
struct SocketEntry {
    local: SocketAddrV4,
    inbound: InboundQueue,
}

#[derive(Debug)]
pub struct SocketTable {
    sockets: HashMap<SocketHandle, SocketEntry>,
    /// The handles bound to each endpoint in bind order. Only the last one receives frames.
    bindings: HashMap<SocketAddrV4, Vec<SocketHandle>>,
    next_handle: u64,
    ephemeral_port_start: u16,
}

impl SocketTable {
    pub fn new(ephemeral_port_start: u16) -> Self {
        Self {
            sockets: HashMap::new(),
            bindings: HashMap::new(),
            next_handle: 1,
            ephemeral_port_start,
        }
    }

    /// Bind a new socket. A port of 0 is replaced by a free port at or above the ephemeral port
    /// start. Binding an endpoint that is already bound is allowed; the newest socket receives
    /// the endpoint's frames until it is unbound.
    pub fn bind(&mut self, endpoint: SocketAddrV4) -> SocketHandle {
        let local = if endpoint.port() == 0 {
            SocketAddrV4::new(*endpoint.ip(), self.free_port(*endpoint.ip()))
        } else {
            endpoint
        };

        let handle = SocketHandle(self.next_handle);
        self.next_handle += 1;

        let previous = self.sockets.insert(
            handle,
            SocketEntry {
                local,
                inbound: InboundQueue::default(),
            },
        );
        assert!(previous.is_none(), "{handle} was allocated twice");

        let bound = self.bindings.entry(local).or_default();
        if let Some(shadowed) = bound.last() {
            log::debug!("{handle} bound to {local}, hiding {shadowed}");
        } else {
            log::debug!("{handle} bound to {local}");
        }
        bound.push(handle);

        handle
    }

    /// Remove the socket and discard any frames queued for it. Unbinding an unknown handle does
    /// nothing. Returns true if the socket was bound.
    pub fn unbind(&mut self, handle: SocketHandle) -> bool {
        let Some(entry) = self.sockets.remove(&handle) else {
            log::trace!("Attempted to unbind vacant {handle}");
            return false;
        };

        match self.bindings.entry(entry.local) {
            Entry::Occupied(mut bound) => {
                bound.get_mut().retain(|x| *x != handle);
                if bound.get().is_empty() {
                    bound.remove();
                }
            }
            Entry::Vacant(_) => {
                debug_panic!("{handle} was bound to {} but not registered", entry.local);
            }
        }

        if !entry.inbound.is_empty() {
            log::debug!(
                "Discarding {} unreceived frames for {handle}",
                entry.inbound.len()
            );
        }
        log::debug!("{handle} unbound from {}", entry.local);

        true
    }

    /// The socket that receives frames addressed to `endpoint`. A socket bound to the exact
    /// endpoint takes priority over one bound to the wildcard address with the same port.
    pub fn lookup_by_endpoint(&self, endpoint: SocketAddrV4) -> Option<SocketHandle> {
        let newest = |addr: &SocketAddrV4| self.bindings.get(addr).and_then(|x| x.last()).copied();

        newest(&endpoint).or_else(|| {
            let wildcard = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, endpoint.port());
            newest(&wildcard)
        })
    }

    pub fn local_addr(&self, handle: SocketHandle) -> Option<SocketAddrV4> {
        self.sockets.get(&handle).map(|x| x.local)
    }

    pub fn inbound(&self, handle: SocketHandle) -> Option<&InboundQueue> {
        self.sockets.get(&handle).map(|x| &x.inbound)
    }

    pub fn inbound_mut(&mut self, handle: SocketHandle) -> Option<&mut InboundQueue> {
        self.sockets.get_mut(&handle).map(|x| &mut x.inbound)
    }

    /// The number of bound sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    fn is_port_in_use(&self, ip: Ipv4Addr, port: u16) -> bool {
        if ip.is_unspecified() {
            return self.bindings.keys().any(|x| x.port() == port);
        }

        self.bindings.contains_key(&SocketAddrV4::new(ip, port))
            || self
                .bindings
                .contains_key(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
    }

    fn free_port(&self, ip: Ipv4Addr) -> u16 {
        let start = self.ephemeral_port_start.max(1);

        if let Some(port) = (start..=u16::MAX).find(|port| !self.is_port_in_use(ip, *port)) {
            return port;
        }

        log::warn!("No free ephemeral ports on {ip}, sharing port {start}");
        start
    }
}
