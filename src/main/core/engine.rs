//! The engine facade. One engine is one virtual network: it owns the socket table, the outbox of
//! frames waiting to be delivered, and the policy that decides what happens to them.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use static_assertions::assert_impl_all;
use vnet_wire::{DecodedPacket, MalformedPacket, MAX_UDP_PAYLOAD_LEN};

use crate::host::socket_table::{SocketHandle, SocketTable};
use crate::network::capture::NetworkObserver;
use crate::network::packet::{Frame, PacketStatus, PendingFrame};
use crate::network::policy::{AlwaysDeliver, DeliveryDecision, ReplyBuilder, TopologyPolicy};
use crate::network::stats::NetworkStats;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// The TTL of every frame the engine creates.
    pub ttl: u8,
    /// The number of times a frame can be deferred before it is dropped.
    pub max_defer_attempts: u32,
    /// The number of synthetic replies that can follow a guest's frame. A reply to a reply is
    /// suppressed unless this is at least 2.
    pub max_synthetic_hops: u8,
    /// The first port tried when binding to port 0.
    pub ephemeral_port_start: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: 64,
            max_defer_attempts: 16,
            max_synthetic_hops: 1,
            ephemeral_port_start: 10000,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The payload does not fit in a single IPv4 packet.
    PacketTooLarge,
    /// The destination is not a usable IPv4 endpoint.
    InvalidAddress,
    /// The socket is not bound.
    UnknownSocket,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PacketTooLarge => write!(
                f,
                "payload is larger than the maximum of {MAX_UDP_PAYLOAD_LEN} bytes"
            ),
            Self::InvalidAddress => write!(f, "destination is not a valid IPv4 address"),
            Self::UnknownSocket => write!(f, "socket is not bound"),
        }
    }
}

impl std::error::Error for SendError {}

pub struct Engine {
    config: EngineConfig,
    sockets: SocketTable,
    outbox: VecDeque<PendingFrame>,
    policy: Box<dyn TopologyPolicy>,
    observers: Vec<Box<dyn NetworkObserver>>,
    next_sequence: u64,
    next_ident: u16,
    stats: NetworkStats,
}

// an engine is created for a guest session and may be moved to the thread that runs it
assert_impl_all!(Engine: Send);

impl Engine {
    pub fn new(policy: impl TopologyPolicy + 'static) -> Self {
        Self::with_config(EngineConfig::default(), policy)
    }

    pub fn with_config(config: EngineConfig, policy: impl TopologyPolicy + 'static) -> Self {
        log::debug!("Creating network engine with {config:?}");
        Self {
            sockets: SocketTable::new(config.ephemeral_port_start),
            config,
            outbox: VecDeque::new(),
            policy: Box::new(policy),
            observers: Vec::new(),
            next_sequence: 0,
            next_ident: 0,
            stats: NetworkStats::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an observer that is told about every frame the engine creates.
    pub fn add_observer(&mut self, observer: impl NetworkObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn bind(&mut self, endpoint: SocketAddrV4) -> SocketHandle {
        self.sockets.bind(endpoint)
    }

    /// Unbind the socket and discard its unreceived frames. Frames still in the outbox for the
    /// socket's endpoint are dropped when polled, unless the endpoint is bound again first.
    pub fn unbind(&mut self, handle: SocketHandle) -> bool {
        self.sockets.unbind(handle)
    }

    pub fn local_addr(&self, handle: SocketHandle) -> Option<SocketAddrV4> {
        self.sockets.local_addr(handle)
    }

    pub fn lookup_by_endpoint(&self, endpoint: SocketAddrV4) -> Option<SocketHandle> {
        self.sockets.lookup_by_endpoint(endpoint)
    }

    /// The number of bound sockets.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// The number of frames delivered to the socket and not yet received.
    pub fn inbound_len(&self, handle: SocketHandle) -> Option<usize> {
        self.sockets.inbound(handle).map(|x| x.len())
    }

    /// Encode a datagram and queue it in the outbox. Nothing is delivered until the next
    /// [`poll`](Self::poll). If an error is returned, the engine is unchanged.
    pub fn send_to(
        &mut self,
        handle: SocketHandle,
        payload: &[u8],
        dst: impl Into<SocketAddr>,
    ) -> Result<(), SendError> {
        let src = self
            .sockets
            .local_addr(handle)
            .ok_or(SendError::UnknownSocket)?;
        let dst = to_ipv4_endpoint(dst.into()).ok_or(SendError::InvalidAddress)?;

        if payload.len() > MAX_UDP_PAYLOAD_LEN {
            return Err(SendError::PacketTooLarge);
        }

        let frame = self.encode(src, dst, payload).ok_or(SendError::PacketTooLarge)?;
        frame.add_status(PacketStatus::SndCreated);

        let sequence = self.transmit(&frame);
        self.stats.sent += 1;

        frame.add_status(PacketStatus::OutboxQueued);
        self.outbox.push_back(PendingFrame::new(frame, sequence, 0));

        Ok(())
    }

    /// Take the oldest datagram delivered to the socket. Returns the payload and the endpoint it
    /// was sent from, or `None` if nothing is waiting.
    pub fn recv_from(&mut self, handle: SocketHandle) -> Option<(Bytes, SocketAddrV4)> {
        let Some(inbound) = self.sockets.inbound_mut(handle) else {
            log::trace!("Receive on unbound {handle}");
            return None;
        };

        let (frame, from) = inbound.pop()?;
        frame.add_status(PacketStatus::RcvSocketDelivered);

        Some((frame.payload(), from))
    }

    /// Resolve every frame in the outbox in sequence order. Replies created by the policy are
    /// resolved in the same poll. Returns the number of frames added to inbound queues.
    pub fn poll(&mut self) -> usize {
        if self.outbox.is_empty() {
            return 0;
        }

        let mut work = std::mem::take(&mut self.outbox);
        work.make_contiguous().sort_by_key(|x| x.sequence);

        let mut delivered = 0;
        let mut deferred = Vec::new();

        while let Some(mut pending) = work.pop_front() {
            let decision = self
                .policy
                .resolve(pending.from, pending.to, pending.attempt);
            log::trace!(
                "Frame {} from {} to {} (attempt {}): {decision:?}",
                pending.sequence,
                pending.from,
                pending.to,
                pending.attempt,
            );

            match decision {
                DeliveryDecision::Deliver => delivered += self.deliver(&pending, 1),
                DeliveryDecision::Drop | DeliveryDecision::Duplicate { copies: 0 } => {
                    self.drop_by_policy(&pending)
                }
                DeliveryDecision::Duplicate { copies } => {
                    if copies > 1 {
                        pending.frame.add_status(PacketStatus::PolicyDuplicated);
                        self.stats.duplicated += u64::from(copies - 1);
                    }
                    delivered += self.deliver(&pending, copies);
                }
                DeliveryDecision::Defer => {
                    if pending.attempt >= self.config.max_defer_attempts {
                        log::warn!(
                            "Dropping frame from {} to {} after {} deferrals",
                            pending.from,
                            pending.to,
                            pending.attempt,
                        );
                        self.drop_by_policy(&pending);
                    } else {
                        pending.frame.add_status(PacketStatus::PolicyDeferred);
                        pending.attempt += 1;
                        self.stats.deferred += 1;
                        deferred.push(pending);
                    }
                }
                DeliveryDecision::DeliverAndReply(reply) => {
                    delivered += self.deliver(&pending, 1);
                    if let Some(reply) = self.synthesize_reply(&pending, reply) {
                        work.push_back(reply);
                    }
                }
                DeliveryDecision::Reply(reply) => match self.synthesize_reply(&pending, reply) {
                    Some(reply) => work.push_back(reply),
                    None => self.drop_by_policy(&pending),
                },
            }
        }

        log::debug!(
            "Poll delivered {delivered} frames, {} deferred to the next poll",
            deferred.len()
        );

        self.outbox.extend(deferred);
        delivered
    }

    /// The number of frames waiting for the next poll.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Tell the observers that a guest reached a named point.
    pub fn report_milestone(&mut self, name: &str) {
        log::debug!("Milestone reached: {name}");
        for observer in &mut self.observers {
            observer.milestone_reached(name);
        }
    }

    /// Decode captured bytes for display. This does not depend on or change any engine state.
    pub fn decode_frame(bytes: &[u8]) -> Result<DecodedPacket, MalformedPacket> {
        vnet_wire::decode_frame(bytes)
    }

    fn encode(&mut self, src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Option<Frame> {
        let frame = Frame::new_ipv4_udp(src, dst, payload, self.next_ident, self.config.ttl)?;
        self.next_ident = self.next_ident.wrapping_add(1);
        Some(frame)
    }

    /// Assign the frame its sequence number and notify the observers.
    fn transmit(&mut self, frame: &Frame) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        for observer in &mut self.observers {
            observer.frame_transmitted(frame, sequence);
        }

        sequence
    }

    fn deliver(&mut self, pending: &PendingFrame, copies: u32) -> usize {
        let Some(handle) = self.sockets.lookup_by_endpoint(pending.to) else {
            log::trace!("No socket bound to {}", pending.to);
            pending.frame.add_status(PacketStatus::RcvNoSocketDropped);
            self.stats.dropped_no_socket += 1;
            return 0;
        };

        let inbound = self
            .sockets
            .inbound_mut(handle)
            .unwrap_or_else(|| panic!("{handle} is bound without an inbound queue"));

        for _ in 0..copies {
            inbound.push(pending.frame.clone(), pending.from);
        }
        pending.frame.add_status(PacketStatus::RcvSocketBuffered);
        self.stats.delivered += u64::from(copies);

        copies as usize
    }

    fn drop_by_policy(&mut self, pending: &PendingFrame) {
        pending.frame.add_status(PacketStatus::PolicyDropped);
        self.stats.dropped_by_policy += 1;
    }

    /// Build a reply to `pending`, sent from its destination back to its sender.
    fn synthesize_reply(
        &mut self,
        pending: &PendingFrame,
        reply: ReplyBuilder,
    ) -> Option<PendingFrame> {
        if pending.hop >= self.config.max_synthetic_hops {
            log::warn!(
                "Suppressing reply from {} to {}: limit of {} synthetic hops reached",
                pending.to,
                pending.from,
                self.config.max_synthetic_hops,
            );
            return None;
        }

        let payload = reply.build(&pending.frame.payload());
        let Some(frame) = self.encode(pending.to, pending.from, &payload) else {
            log::warn!(
                "Suppressing reply from {} to {}: {} byte payload is too large",
                pending.to,
                pending.from,
                payload.len(),
            );
            return None;
        };

        frame.add_status(PacketStatus::ReplySynthesized);
        let sequence = self.transmit(&frame);
        self.stats.replies += 1;

        Some(PendingFrame::new(frame, sequence, pending.hop + 1))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(AlwaysDeliver)
    }
}

/// Convert a destination to an IPv4 endpoint. IPv6 destinations are only accepted if they are
/// IPv4-mapped, and the address and port must not be 0.
pub fn to_ipv4_endpoint(addr: SocketAddr) -> Option<SocketAddrV4> {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(ip) => ip.to_ipv4_mapped()?,
    };

    if ip.is_unspecified() || addr.port() == 0 {
        return None;
    }

    Some(SocketAddrV4::new(ip, addr.port()))
}
