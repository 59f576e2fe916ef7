//! Network transport for control signaling and RTP media delivery.
//!
//! The split transport model:
//!
//! - **TCP** ([`tcp`]): carries the text control protocol. One persistent
//!   connection per session, with a reader thread on each end.
//!
//! - **UDP** ([`udp`]): carries RTP packets. Each side owns exactly one
//!   data socket per session: the server's transmit worker writes to it,
//!   the client's receive worker reads from it.

pub mod tcp;
pub mod udp;

pub use udp::TransportConfig;
