//! Socket setup glue.
//!
//! Everything here runs once at startup and hands already-bound,
//! non-blocking sockets to the reactor. Both sockets get SO_REUSEADDR and
//! SO_REUSEPORT so restarts do not fight lingering bindings.

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, UdpSocket};
use socket2::{Domain, Protocol, Socket, Type};

/// Listen backlog for the TCP socket.
const BACKLOG: i32 = 1024;

fn domain_for(addr: SocketAddr) -> Domain {
    match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    }
}

/// Create a bound, listening, non-blocking TCP socket with address/port reuse.
pub fn bind_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(domain_for(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// Create a bound, non-blocking UDP socket with address/port reuse.
pub fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(domain_for(addr), Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(UdpSocket::from_std(socket.into()))
}

/// Ignore SIGPIPE for the whole process.
///
/// Writes to a closed peer then fail with EPIPE at the call site, where the
/// connection handles them, instead of terminating the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_tcp_ephemeral() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_tcp_and_udp_share_port() {
        let listener = bind_tcp("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = listener.local_addr().unwrap().port();

        // Different protocols on the same port is the normal dual-bind case.
        let socket = bind_udp(format!("127.0.0.1:{port}").parse().unwrap()).unwrap();
        assert_eq!(socket.local_addr().unwrap().port(), port);
    }
}
