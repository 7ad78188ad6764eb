//! Local interface discovery.
//!
//! A socket bound to `0.0.0.0` reports an unspecified local address. The
//! open-internet check needs the concrete interface address the kernel would
//! route through, which `outbound_ipv4` finds by connecting a throwaway UDP
//! socket. Connecting a UDP socket sends no packets.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Return the IPv4 address of the interface used to reach `target`.
///
/// # Errors
///
/// Returns an error if no IPv4 route to `target` exists.
///
/// # Examples
/// ```no_run
/// use natprobe_transport::udp::outbound_ipv4;
///
/// let ip = outbound_ipv4("198.51.100.7:3478".parse().unwrap()).unwrap();
/// println!("Outbound interface: {ip}");
/// ```
pub fn outbound_ipv4(target: SocketAddrV4) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(target)?;

    match socket.local_addr()? {
        SocketAddr::V4(local) => Ok(*local.ip()),
        SocketAddr::V6(local) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("route to {target} uses IPv6 interface {local}"),
        )),
    }
}

/// Resolve the address a bound socket is reachable on.
///
/// A concrete bind IP is returned as is. An unspecified one is replaced by the
/// outbound interface toward `target`.
///
/// # Errors
///
/// Returns an error if the outbound interface cannot be determined.
pub fn effective_local_ipv4(bound: Ipv4Addr, target: SocketAddrV4) -> io::Result<Ipv4Addr> {
    if bound.is_unspecified() {
        outbound_ipv4(target)
    } else {
        Ok(bound)
    }
}
