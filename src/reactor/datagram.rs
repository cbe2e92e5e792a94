//! UDP echo endpoint.
//!
//! No per-sender state: each datagram is received, echoed to the source
//! address it came with, and forgotten. A zero-length receive retires the
//! endpoint — inherited behavior that mirrors TCP end-of-stream handling,
//! kept as documented even though UDP has no real close signal.

use std::io;

use mio::net::UdpSocket;
use tracing::{debug, warn};

/// Maximum datagram accepted; longer datagrams are truncated by the
/// transport.
pub const MAX_DATAGRAM: usize = 4096;

/// Outcome of a readiness callback on the UDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramStatus {
    /// Still registered and echoing.
    Open,
    /// Zero-length receive observed; the event loop must deregister this
    /// endpoint.
    Retired,
}

/// Owns the bound UDP socket.
pub struct DatagramEndpoint {
    socket: UdpSocket,
}

impl DatagramEndpoint {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub(crate) fn inner(&self) -> &UdpSocket {
        &self.socket
    }

    pub(crate) fn inner_mut(&mut self) -> &mut UdpSocket {
        &mut self.socket
    }

    /// Drain the socket, echoing one datagram per receive.
    ///
    /// Failures are packet-scoped: a reply that cannot be sent is dropped
    /// and logged, and the endpoint keeps running.
    pub fn ready(&mut self) -> DatagramStatus {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((0, peer)) => {
                    debug!(%peer, "zero-length datagram, retiring UDP endpoint");
                    return DatagramStatus::Retired;
                }
                Ok((n, peer)) => match self.socket.send_to(&buf[..n], peer) {
                    Ok(sent) if sent < n => {
                        warn!(%peer, len = n, sent, "short UDP send, reply truncated");
                    }
                    Ok(_) => {}
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        debug!(%peer, len = n, "UDP send would block, reply dropped");
                    }
                    Err(e) => {
                        warn!(%peer, len = n, error = %e, "UDP send failed, reply dropped");
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return DatagramStatus::Open,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    return DatagramStatus::Open;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net;
    use std::time::Duration;

    fn endpoint_and_client() -> (DatagramEndpoint, std::net::UdpSocket) {
        let socket = net::bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        (DatagramEndpoint::new(socket), client)
    }

    #[test]
    fn test_echoes_datagram_to_sender() {
        let (mut endpoint, client) = endpoint_and_client();

        client.send(b"hello").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(endpoint.ready(), DatagramStatus::Open);

        let mut buf = [0u8; 32];
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_drains_multiple_datagrams() {
        let (mut endpoint, client) = endpoint_and_client();

        client.send(b"one").unwrap();
        client.send(b"two").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(endpoint.ready(), DatagramStatus::Open);

        let mut buf = [0u8; 32];
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one");
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"two");
    }

    #[test]
    fn test_zero_length_datagram_retires() {
        let (mut endpoint, client) = endpoint_and_client();

        client.send(b"").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(endpoint.ready(), DatagramStatus::Retired);
    }
}
