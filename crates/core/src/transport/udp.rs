use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Result;
use crate::media::fragment::{DEFAULT_MTU, IP_UDP_OVERHEAD, max_payload_for_mtu};

/// Datagram socket knobs shared by both ends.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Link MTU used to derive the safe RTP payload.
    pub mtu: usize,
    /// Network + transport header bytes subtracted from the MTU.
    pub ip_udp_overhead: usize,
    /// Replaces the derived payload size when set.
    pub max_payload_override: Option<usize>,
    /// `SO_SNDBUF` for the sender's data socket.
    pub send_buffer_size: usize,
    /// `SO_RCVBUF` for the receiver's data socket.
    pub recv_buffer_size: usize,
    /// Receive timeout; bounds how long the receive loop can miss a stop.
    pub recv_timeout: Duration,
    /// Put the sender's socket in non-blocking mode.
    pub nonblocking_send: bool,
    /// Pause before the single retry of a send that would block.
    pub send_retry_delay: Duration,
}

impl TransportConfig {
    /// Largest RTP payload per datagram.
    pub fn max_payload(&self) -> Result<usize> {
        match self.max_payload_override {
            Some(n) => Ok(n),
            None => max_payload_for_mtu(self.mtu, self.ip_udp_overhead),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            ip_udp_overhead: IP_UDP_OVERHEAD,
            max_payload_override: None,
            send_buffer_size: 8 * 1024 * 1024,
            recv_buffer_size: 10 * 1024 * 1024,
            recv_timeout: Duration::from_millis(500),
            nonblocking_send: true,
            send_retry_delay: Duration::from_micros(10),
        }
    }
}

/// Bind an ephemeral IPv4 socket for outbound RTP.
///
/// A refused buffer size is logged and the OS default kept.
pub fn bind_sender(config: &TransportConfig) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        tracing::warn!(error = %e, size = config.send_buffer_size, "could not enlarge send buffer");
    }
    socket.set_nonblocking(config.nonblocking_send)?;
    let any: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into();
    socket.bind(&any.into())?;

    let socket: UdpSocket = socket.into();
    tracing::debug!(local = ?socket.local_addr().ok(), "RTP send socket bound");
    Ok(socket)
}

/// Bind the client's RTP receive socket on `port` (all interfaces).
pub fn bind_receiver(port: u16, config: &TransportConfig) -> Result<UdpSocket> {
    bind_receiver_at(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into(), config)
}

pub fn bind_receiver_at(addr: SocketAddr, config: &TransportConfig) -> Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!(error = %e, size = config.recv_buffer_size, "could not enlarge receive buffer");
    }
    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(config.recv_timeout))?;
    tracing::debug!(local = ?socket.local_addr().ok(), "RTP receive socket bound");
    Ok(socket)
}
