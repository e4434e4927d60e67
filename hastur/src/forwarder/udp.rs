use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

use tracing::debug;

use super::{Destination, Sink};

/// A sink that writes each payload as a single UDP datagram.
///
/// The socket is bound to an ephemeral local port and connected to the destination, so writes go straight to the
/// agent without any per-message address lookup.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
}

impl UdpSink {
    /// Creates a sink connected to the first usable address in `addrs`.
    ///
    /// # Errors
    ///
    /// If no local socket could be bound, or it could not be connected to any of the addresses, an error is returned.
    pub fn connect(addrs: &[SocketAddr], write_timeout: Option<Duration>) -> io::Result<Self> {
        let first = addrs
            .first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no destination addresses"))?;

        let socket = if first.is_ipv6() {
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        } else {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        };
        socket.connect(addrs)?;
        socket.set_write_timeout(write_timeout)?;

        debug!(local_addr = ?socket.local_addr().ok(), peer_addr = ?socket.peer_addr().ok(), "Connected UDP sink.");

        Ok(UdpSink { socket })
    }

    pub(crate) fn from_destination(destination: &Destination, write_timeout: Option<Duration>) -> io::Result<Self> {
        let addrs = destination
            .resolve()
            .map_err(|reason| io::Error::new(io::ErrorKind::InvalidInput, reason))?;
        Self::connect(&addrs, write_timeout)
    }
}

impl Sink for UdpSink {
    fn emit(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }
}
