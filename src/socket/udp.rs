// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UDP socket construction for PD and MD traffic (`spec.md` §4.1, §6).
//!
//! Grounded on the teacher's `transport::udp::UdpTransport` construction
//! sequence (`socket2::Socket::new` + `set_reuse_address` + bind), collapsed
//! to one socket per purpose instead of the teacher's three-socket
//! metatraffic/unicast/user split — here [`crate::socket::SocketPool`]
//! already gives each purpose its own slot.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

/// Build a UDP socket bound to `bind_addr`, non-blocking, with
/// `SO_REUSEADDR` so multiple sessions on one host can share a multicast
/// receive port.
pub fn bind(bind_addr: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(bind_addr).into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Join a multicast group on the given local interface.
pub fn join_multicast(socket: &UdpSocket, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    socket.join_multicast_v4(&group, &iface)
}

/// Leave a multicast group previously joined with [`join_multicast`].
pub fn leave_multicast(socket: &UdpSocket, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
    socket.leave_multicast_v4(&group, &iface)
}

/// Set the outgoing multicast TTL (hop count), `spec.md` §6.
pub fn set_multicast_ttl(socket: &UdpSocket, ttl: u32) -> io::Result<()> {
    socket.set_multicast_ttl_v4(ttl)
}
