//! Accepting endpoint for the TCP side of the service.

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};

/// Owns the bound, listening TCP socket.
///
/// The socket arrives from setup already non-blocking; readiness handling
/// and the fail-fast policy on accept errors live in the event loop.
pub struct ListenerEndpoint {
    listener: TcpListener,
}

impl ListenerEndpoint {
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` when the accept queue is drained. Any other error
    /// is the listener becoming unusable and is the caller's to escalate.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn inner_mut(&mut self) -> &mut TcpListener {
        &mut self.listener
    }

    pub(crate) fn inner(&self) -> &TcpListener {
        &self.listener
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net;
    use std::time::Duration;

    #[test]
    fn test_accept_empty_queue_is_none() {
        let listener = net::bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let endpoint = ListenerEndpoint::new(listener);

        assert!(endpoint.accept().unwrap().is_none());
    }

    #[test]
    fn test_accept_pending_connection() {
        let listener = net::bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = ListenerEndpoint::new(listener);

        let client = std::net::TcpStream::connect(addr).unwrap();
        // Give the kernel a beat to move the connection to the accept queue.
        std::thread::sleep(Duration::from_millis(50));

        let (_stream, peer) = endpoint.accept().unwrap().expect("connection pending");
        assert_eq!(peer, client.local_addr().unwrap());
        assert!(endpoint.accept().unwrap().is_none());
    }
}
