//! A deterministic virtual network that lets sandboxed guest programs exchange UDP datagrams.
//!
//! Guests bind sockets and send datagrams through an [`Engine`](core::engine::Engine), which
//! encodes each datagram as an IPv4/UDP frame and holds it in an outbox. Nothing moves until the
//! caller polls the engine, at which point a [`TopologyPolicy`](network::policy::TopologyPolicy)
//! decides what happens to each frame (deliver, drop, duplicate, defer, or answer it with a
//! synthesized reply).

// modules with macros must be included before other modules
#[macro_use]
pub mod utility;

pub mod core;
pub mod host;
pub mod network;

pub use vnet_wire as wire;
