//! The reactor: readiness multiplexing and dispatch.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! owning source performs non-blocking syscalls. Uses epoll on Linux,
//! kqueue on macOS.
//!
//! The slab registration table is the sole owner of every active source;
//! tearing a source down is removing it from the table, which deregisters
//! the descriptor and then closes it on drop.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use tracing::{debug, error, warn};

use super::connection::{ConnStatus, Connection};
use super::datagram::{DatagramEndpoint, DatagramStatus};
use super::listener::ListenerEndpoint;

/// Readiness events drained per poll call.
const EVENT_CAPACITY: usize = 256;

/// An event source the reactor can own and dispatch to.
pub enum Source {
    Listener(ListenerEndpoint),
    Conn(Connection),
    Datagram(DatagramEndpoint),
}

impl Source {
    fn raw_fd(&self) -> RawFd {
        match self {
            Source::Listener(l) => l.inner().as_raw_fd(),
            Source::Conn(c) => c.inner().as_raw_fd(),
            Source::Datagram(d) => d.inner().as_raw_fd(),
        }
    }
}

/// Registration failure.
#[derive(Debug)]
pub enum RegisterError {
    /// The descriptor is already present in the registration table.
    AlreadyRegistered(RawFd),
    /// The poller rejected the registration.
    Io(io::Error),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::AlreadyRegistered(fd) => {
                write!(f, "descriptor {fd} is already registered")
            }
            RegisterError::Io(e) => write!(f, "failed to register with the poller: {e}"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Single-threaded readiness multiplexer.
///
/// All registration-table mutation happens on the thread running [`run`],
/// from within dispatch; no locking is involved.
///
/// [`run`]: Reactor::run
pub struct Reactor {
    poll: Poll,
    sources: Slab<Source>,
    stopped: bool,
    /// Slab keys freed during the current dispatch pass. A stale event still
    /// queued for such a token must be dropped, even if the key has already
    /// been handed to a source registered later in the same pass.
    freed_this_pass: Vec<usize>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            sources: Slab::new(),
            stopped: false,
            freed_this_pass: Vec::new(),
        })
    }

    /// Add a source to the registration table and arm its read interest.
    ///
    /// The slab key doubles as the poll token. Registering a descriptor
    /// that is already in the table fails.
    pub fn register(&mut self, source: Source) -> Result<Token, RegisterError> {
        let fd = source.raw_fd();
        if self.sources.iter().any(|(_, s)| s.raw_fd() == fd) {
            return Err(RegisterError::AlreadyRegistered(fd));
        }

        let entry = self.sources.vacant_entry();
        let token = Token(entry.key());
        let registry = self.poll.registry();

        let registered = match entry.insert(source) {
            Source::Listener(l) => registry.register(l.inner_mut(), token, Interest::READABLE),
            Source::Conn(c) => {
                let interest = c.interest();
                registry.register(c.inner_mut(), token, interest)
            }
            Source::Datagram(d) => registry.register(d.inner_mut(), token, Interest::READABLE),
        };

        if let Err(e) = registered {
            self.sources.remove(token.0);
            return Err(RegisterError::Io(e));
        }

        Ok(token)
    }

    /// Remove a source, deregister its descriptor, and drop it.
    ///
    /// Idempotent: unknown tokens are a no-op. The descriptor is
    /// deregistered before the drop closes it.
    pub fn deregister(&mut self, token: Token) {
        let Some(mut source) = self.sources.try_remove(token.0) else {
            return;
        };
        self.freed_this_pass.push(token.0);

        let registry = self.poll.registry();
        let result = match &mut source {
            Source::Listener(l) => registry.deregister(l.inner_mut()),
            Source::Conn(c) => registry.deregister(c.inner_mut()),
            Source::Datagram(d) => registry.deregister(d.inner_mut()),
        };

        if let Err(e) = result {
            debug!(token = token.0, error = %e, "Deregister failed");
        }
    }

    /// Block, polling and dispatching readiness events, until [`stop`] is
    /// requested.
    ///
    /// A stop request takes effect between dispatch passes; in-flight
    /// callbacks always run to completion.
    ///
    /// [`stop`]: Reactor::stop
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        while !self.stopped {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            self.freed_this_pass.clear();
            for event in events.iter() {
                self.dispatch(event.token(), event.is_readable());
            }
        }

        Ok(())
    }

    /// Request loop termination after the current dispatch pass completes.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    fn dispatch(&mut self, token: Token, readable: bool) {
        // A token deregistered earlier in this pass may since have been
        // reused by a new source; any event for it in this pass predates
        // the teardown and is stale either way.
        if self.freed_this_pass.contains(&token.0) {
            return;
        }

        match self.sources.get(token.0) {
            Some(Source::Listener(_)) => self.listener_ready(token),
            Some(Source::Conn(_)) => self.conn_ready(token, readable),
            Some(Source::Datagram(_)) => self.datagram_ready(token),
            None => {}
        }
    }

    /// Drain the accept queue, registering a connection per accepted peer.
    fn listener_ready(&mut self, token: Token) {
        loop {
            let accepted = match self.sources.get(token.0) {
                Some(Source::Listener(l)) => l.accept(),
                _ => return,
            };

            if !self.handle_accepted(accepted) {
                return;
            }
        }
    }

    /// Apply one accept outcome; returns `false` when the drain must end.
    ///
    /// An accept error or a failure to set up an accepted connection makes
    /// the service unable to take further clients: fail fast and stop the
    /// loop rather than retry indefinitely.
    fn handle_accepted(
        &mut self,
        accepted: io::Result<Option<(TcpStream, SocketAddr)>>,
    ) -> bool {
        match accepted {
            Ok(Some((stream, peer))) => {
                match self.register(Source::Conn(Connection::new(stream, peer))) {
                    Ok(t) => {
                        debug!(token = t.0, %peer, "Accepted connection");
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "Could not set up accepted connection, shutting down");
                        self.stop();
                        false
                    }
                }
            }
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "Accept failed, shutting down");
                self.stop();
                false
            }
        }
    }

    fn conn_ready(&mut self, token: Token, readable: bool) {
        let (peer, status) = {
            let registry = self.poll.registry();
            let conn = match self.sources.get_mut(token.0) {
                Some(Source::Conn(c)) => c,
                _ => return,
            };
            (conn.peer(), conn.ready(readable, registry, token))
        };

        // Connection errors are connection-scoped: tear down, keep serving.
        match status {
            Ok(ConnStatus::Open) => {}
            Ok(ConnStatus::Closed) => {
                debug!(token = token.0, %peer, "Connection closed");
                self.deregister(token);
            }
            Err(e) => {
                debug!(token = token.0, %peer, error = %e, "Connection error");
                self.deregister(token);
            }
        }
    }

    fn datagram_ready(&mut self, token: Token) {
        let status = match self.sources.get_mut(token.0) {
            Some(Source::Datagram(d)) => d.ready(),
            _ => return,
        };

        if status == DatagramStatus::Retired {
            warn!(token = token.0, "UDP endpoint retired");
            self.deregister(token);
        }
    }

    #[cfg(test)]
    fn source_count(&self) -> usize {
        self.sources.len()
    }
}
