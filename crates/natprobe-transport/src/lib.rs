//! # natprobe Transport
//!
//! Datagram transport for NAT probing.
//!
//! This crate provides:
//! - The `Transport` trait that probing code is written against
//! - A tokio UDP implementation with `SO_REUSEADDR` and a small receive buffer
//! - Outbound interface discovery for sockets bound to `0.0.0.0`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transport;
pub mod udp;
pub mod udp_async;

pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::{AsyncUdpTransport, UdpOptions};
