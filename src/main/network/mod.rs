//! The virtual network.
//!
//! This contains the frames that travel between hosts and everything that decides where they go.
//! The sockets that frames are delivered to live in the [`crate::host`] module.

pub mod capture;
pub mod graph;
pub mod packet;
pub mod policy;
pub mod stats;
