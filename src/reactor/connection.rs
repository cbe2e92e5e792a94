//! Per-client TCP echo connection.
//!
//! Each connection reads whatever is available, appends it verbatim to an
//! output queue, and flushes as far as the socket allows. Bytes the socket
//! will not take stay queued and the connection re-arms write interest
//! until the queue drains; only then does it read again. End-of-stream with
//! queued output finishes the flush before teardown.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

/// Bytes read per syscall on the hot path.
const READ_CHUNK: usize = 4096;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Echoing normally.
    Active,
    /// Peer closed; flushing remaining output before teardown.
    Closing,
}

/// Outcome of a readiness callback, as seen by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Still registered and waiting for the next notification.
    Open,
    /// Done; the event loop must deregister and drop the connection.
    Closed,
}

/// One accepted TCP client.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnState,
    /// Bytes read but not yet written back.
    out: BytesMut,
    /// Interest currently armed with the poller.
    interest: Interest,
}

impl Connection {
    /// Wrap an accepted, non-blocking stream in initial reading state.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Active,
            out: BytesMut::new(),
            interest: Interest::READABLE,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn inner(&self) -> &TcpStream {
        &self.stream
    }

    pub(crate) fn inner_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn interest(&self) -> Interest {
        self.interest
    }

    /// Handle one readiness notification.
    ///
    /// `readable` reflects the event; write readiness needs no flag since a
    /// flush is attempted whenever output is queued. Returns `Closed` once
    /// the connection should be torn down; I/O errors propagate and mean
    /// the same thing to the caller.
    pub fn ready(
        &mut self,
        readable: bool,
        registry: &Registry,
        token: Token,
    ) -> io::Result<ConnStatus> {
        if readable && self.state == ConnState::Active {
            self.fill()?;
        }

        self.flush()?;

        if !self.out.is_empty() {
            // Output pending: stop reading until the socket drains what we
            // already owe the peer.
            self.rearm(Interest::WRITABLE, registry, token)?;
            return Ok(ConnStatus::Open);
        }

        if self.state == ConnState::Closing {
            return Ok(ConnStatus::Closed);
        }

        self.rearm(Interest::READABLE, registry, token)?;
        Ok(ConnStatus::Open)
    }

    /// Read all currently available bytes into the output queue.
    fn fill(&mut self) -> io::Result<()> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.state = ConnState::Closing;
                    return Ok(());
                }
                Ok(n) => self.out.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write queued output until drained or the socket pushes back.
    fn flush(&mut self) -> io::Result<()> {
        while !self.out.is_empty() {
            match self.stream.write(&self.out) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"))
                }
                Ok(n) => self.out.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn rearm(&mut self, want: Interest, registry: &Registry, token: Token) -> io::Result<()> {
        if self.interest != want {
            registry.reregister(&mut self.stream, token, want)?;
            self.interest = want;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use std::io::{Read as _, Write as _};
    use std::time::Duration;

    /// Localhost socket pair: (mio-wrapped server connection, std client).
    fn socket_pair() -> (Connection, std::net::TcpStream, Poll) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut conn = Connection::new(TcpStream::from_std(server), peer);
        let poll = Poll::new().unwrap();
        poll.registry()
            .register(conn.inner_mut(), Token(0), Interest::READABLE)
            .unwrap();

        (conn, client, poll)
    }

    #[test]
    fn test_new_connection_is_active_read_interest() {
        let (conn, _client, _poll) = socket_pair();
        assert_eq!(conn.state, ConnState::Active);
        assert_eq!(conn.interest(), Interest::READABLE);
    }

    #[test]
    fn test_echoes_available_bytes() {
        let (mut conn, mut client, poll) = socket_pair();

        client.write_all(b"ping").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let status = conn.ready(true, poll.registry(), Token(0)).unwrap();
        assert_eq!(status, ConnStatus::Open);
        assert!(conn.out.is_empty());

        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"ping");
    }

    #[test]
    fn test_peer_close_tears_down() {
        let (mut conn, client, poll) = socket_pair();

        drop(client);
        std::thread::sleep(Duration::from_millis(50));

        let status = conn.ready(true, poll.registry(), Token(0)).unwrap();
        assert_eq!(status, ConnStatus::Closed);
        assert_eq!(conn.state, ConnState::Closing);
    }

    #[test]
    fn test_spurious_writable_event_is_harmless() {
        let (mut conn, _client, poll) = socket_pair();

        // No data read, nothing queued: connection stays open and readable.
        let status = conn.ready(false, poll.registry(), Token(0)).unwrap();
        assert_eq!(status, ConnStatus::Open);
        assert_eq!(conn.interest(), Interest::READABLE);
    }
}
