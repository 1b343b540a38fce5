//! The host side of the network: the sockets that guest programs bind, and the calls they use to
//! reach them.

pub mod guest_socket;
pub mod net_api;
pub mod session;
pub mod socket_table;
