//! Topology policies decide what happens to each frame when the network is polled.
//!
//! A policy sees only the endpoints of a frame and how many times the frame has already been
//! deferred. Everything a scenario needs to remember between frames (counters, random number
//! generators, name records) lives inside the policy itself, so two engines driven by the same
//! sequence of calls make the same decisions.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::network::graph::LinkGraph;

pub mod name_server;
pub mod rules;

use rules::{Rule, ScenarioRule};

/// Builds the payload of a synthetic reply from the payload of the request it answers.
pub struct ReplyBuilder(Box<dyn FnOnce(&[u8]) -> Vec<u8> + Send>);

impl ReplyBuilder {
    pub fn new(f: impl FnOnce(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// A reply with the same payload regardless of the request.
    pub fn fixed(payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        Self::new(move |_| payload)
    }

    pub fn build(self, request: &[u8]) -> Vec<u8> {
        (self.0)(request)
    }
}

impl std::fmt::Debug for ReplyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReplyBuilder(..)")
    }
}

#[derive(Debug)]
pub enum DeliveryDecision {
    Deliver,
    Drop,
    /// Deliver `copies` identical frames. A value of 1 is the same as `Deliver` and 0 is the
    /// same as `Drop`.
    Duplicate { copies: u32 },
    /// Keep the frame in the outbox until the next poll.
    Defer,
    /// Deliver the frame and send a reply back to its sender.
    DeliverAndReply(ReplyBuilder),
    /// Consume the frame and send a reply back to its sender in its place.
    Reply(ReplyBuilder),
}

pub trait TopologyPolicy: Send {
    /// Decide the fate of a frame from `from` to `to`. `attempt` is the number of times this
    /// frame was previously deferred.
    fn resolve(&mut self, from: SocketAddrV4, to: SocketAddrV4, attempt: u32) -> DeliveryDecision;
}

impl<F> TopologyPolicy for F
where
    F: FnMut(SocketAddrV4, SocketAddrV4, u32) -> DeliveryDecision + Send,
{
    fn resolve(&mut self, from: SocketAddrV4, to: SocketAddrV4, attempt: u32) -> DeliveryDecision {
        self(from, to, attempt)
    }
}

/// Every pair of endpoints is connected and nothing is ever lost.
#[derive(Copy, Clone, Debug, Default)]
pub struct AlwaysDeliver;

impl TopologyPolicy for AlwaysDeliver {
    fn resolve(
        &mut self,
        _from: SocketAddrV4,
        _to: SocketAddrV4,
        _attempt: u32,
    ) -> DeliveryDecision {
        DeliveryDecision::Deliver
    }
}

#[derive(Debug)]
pub enum Links {
    FullyConnected,
    Graph(LinkGraph),
}

impl Links {
    /// Frames between two endpoints on the same address are always deliverable.
    pub fn connects(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        match self {
            Self::FullyConnected => true,
            Self::Graph(graph) => graph.is_linked(a, b),
        }
    }
}

/// A link layout and an ordered list of rules. The first rule that has an opinion about a frame
/// decides it; frames that no rule cares about are delivered.
#[derive(Debug)]
pub struct Scenario {
    links: Links,
    rules: Vec<Rule>,
}

impl Scenario {
    pub fn new(links: Links) -> Self {
        Self {
            links,
            rules: Vec::new(),
        }
    }

    pub fn fully_connected() -> Self {
        Self::new(Links::FullyConnected)
    }

    pub fn with_rule(mut self, rule: impl Into<Rule>) -> Self {
        self.push_rule(rule);
        self
    }

    pub fn push_rule(&mut self, rule: impl Into<Rule>) {
        self.rules.push(rule.into());
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl TopologyPolicy for Scenario {
    fn resolve(&mut self, from: SocketAddrV4, to: SocketAddrV4, attempt: u32) -> DeliveryDecision {
        if !self.links.connects(*from.ip(), *to.ip()) {
            log::trace!("No link between {} and {}", from.ip(), to.ip());
            return DeliveryDecision::Drop;
        }

        self.rules
            .iter_mut()
            .find_map(|rule| rule.resolve(from, to, attempt))
            .unwrap_or(DeliveryDecision::Deliver)
    }
}
