use std::{
    fmt, io,
    net::{SocketAddr, ToSocketAddrs as _},
};

mod udp;
pub use self::udp::UdpSink;

/// Default address of the local Hastur agent.
pub const DEFAULT_UDP_ADDRESS: &str = "127.0.0.1";

/// Default port of the local Hastur agent.
pub const DEFAULT_UDP_PORT: u16 = 8125;

/// A destination that encoded messages are written to.
///
/// Each call to `emit` carries exactly one encoded message, and should be written as a single datagram (or the
/// equivalent for non-datagram transports).
pub trait Sink: Send + Sync {
    /// Writes a single payload, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// If the payload could not be written, an error is returned. The client does not retry.
    fn emit(&self, payload: &[u8]) -> io::Result<usize>;
}

impl<T> Sink for std::sync::Arc<T>
where
    T: Sink + ?Sized,
{
    fn emit(&self, payload: &[u8]) -> io::Result<usize> {
        (**self).emit(payload)
    }
}

/// Host and port of the agent messages are sent to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Destination {
    pub address: String,
    pub port: u16,
}

impl Destination {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Destination { address: address.into(), port }
    }

    /// Resolves the destination to the socket addresses it refers to.
    pub fn resolve(&self) -> Result<Vec<SocketAddr>, String> {
        let addrs = (self.address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| e.to_string())?
            .collect::<Vec<_>>();

        if addrs.is_empty() {
            Err("address did not resolve to any socket addresses".to_string())
        } else {
            Ok(addrs)
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Destination::new(DEFAULT_UDP_ADDRESS, DEFAULT_UDP_PORT)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Destination;

    #[test]
    fn resolves_literal_addresses() {
        let addrs = Destination::default().resolve().expect("should resolve");
        assert_eq!(addrs, vec!["127.0.0.1:8125".parse().expect("valid socket address")]);

        let v6 = Destination::new("::1", 9000);
        assert_eq!(v6.to_string(), "[::1]:9000");
        assert!(v6.resolve().expect("should resolve")[0].is_ipv6());
    }

    #[test]
    fn rejects_unresolvable_addresses() {
        assert!(Destination::new("not a host name", 8125).resolve().is_err());
    }
}
