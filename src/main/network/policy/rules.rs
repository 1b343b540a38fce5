//! The rules a [`Scenario`](super::Scenario) applies to frames, in order.

use std::net::SocketAddrV4;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::name_server::NameServer;
use super::DeliveryDecision;

#[enum_dispatch::enum_dispatch]
pub trait ScenarioRule {
    /// Returns `None` if this rule has no opinion about the frame.
    fn resolve(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        attempt: u32,
    ) -> Option<DeliveryDecision>;
}

#[enum_dispatch::enum_dispatch(ScenarioRule)]
#[derive(Debug)]
pub enum Rule {
    NameServer(NameServer),
    DropFirst(DropFirst),
    Duplicate(Duplicate),
    HoldBack(HoldBack),
    RandomLoss(RandomLoss),
}

/// Selects the frames of a flow. A missing endpoint matches any endpoint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowFilter {
    pub from: Option<SocketAddrV4>,
    pub to: Option<SocketAddrV4>,
}

impl FlowFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn between(from: SocketAddrV4, to: SocketAddrV4) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn sent_by(from: SocketAddrV4) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn sent_to(to: SocketAddrV4) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    pub fn matches(&self, from: SocketAddrV4, to: SocketAddrV4) -> bool {
        self.from.map_or(true, |x| x == from) && self.to.map_or(true, |x| x == to)
    }
}

/// Drop the first `count` frames of a flow.
#[derive(Debug)]
pub struct DropFirst {
    filter: FlowFilter,
    count: u32,
    dropped: u32,
}

impl DropFirst {
    pub fn new(filter: FlowFilter, count: u32) -> Self {
        Self {
            filter,
            count,
            dropped: 0,
        }
    }
}

impl ScenarioRule for DropFirst {
    fn resolve(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        _attempt: u32,
    ) -> Option<DeliveryDecision> {
        if self.dropped >= self.count || !self.filter.matches(from, to) {
            return None;
        }
        self.dropped += 1;
        Some(DeliveryDecision::Drop)
    }
}

/// Deliver every frame of a flow `copies` times.
#[derive(Debug)]
pub struct Duplicate {
    filter: FlowFilter,
    copies: u32,
}

impl Duplicate {
    pub fn new(filter: FlowFilter, copies: u32) -> Self {
        Self { filter, copies }
    }
}

impl ScenarioRule for Duplicate {
    fn resolve(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        _attempt: u32,
    ) -> Option<DeliveryDecision> {
        self.filter.matches(from, to).then_some(DeliveryDecision::Duplicate {
            copies: self.copies,
        })
    }
}

/// Hold back every `every`-th frame of a flow for one poll, so that it arrives after the frames
/// sent behind it.
#[derive(Debug)]
pub struct HoldBack {
    filter: FlowFilter,
    every: u64,
    seen: u64,
}

impl HoldBack {
    pub fn new(filter: FlowFilter, every: u64) -> Self {
        assert!(every > 0, "A hold back rule must hold back every 1 or more frames");
        Self {
            filter,
            every,
            seen: 0,
        }
    }
}

impl ScenarioRule for HoldBack {
    fn resolve(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        attempt: u32,
    ) -> Option<DeliveryDecision> {
        // a frame is only held back the first time we see it
        if attempt != 0 || !self.filter.matches(from, to) {
            return None;
        }

        self.seen += 1;
        (self.seen % self.every == 0).then_some(DeliveryDecision::Defer)
    }
}

/// Drop frames of a flow at random. The generator is seeded, so the same seed drops the same
/// frames.
#[derive(Debug)]
pub struct RandomLoss {
    filter: FlowFilter,
    probability: f64,
    rng: Xoshiro256PlusPlus,
}

impl RandomLoss {
    pub fn new(filter: FlowFilter, probability: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "Loss probability {probability} is not within [0, 1]"
        );
        Self {
            filter,
            probability,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl ScenarioRule for RandomLoss {
    fn resolve(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        _attempt: u32,
    ) -> Option<DeliveryDecision> {
        if !self.filter.matches(from, to) {
            return None;
        }
        self.rng
            .gen_bool(self.probability)
            .then_some(DeliveryDecision::Drop)
    }
}
