//! echod: a dual-protocol echo server
//!
//! Binds one port for both TCP and UDP and writes back exactly what it
//! receives:
//! - TCP: byte-exact, order-preserving echo per connection
//! - UDP: one reply datagram per received datagram, to the sender
//!
//! All sockets are driven by a single-threaded readiness reactor
//! (mio: epoll on Linux, kqueue on macOS).

mod config;
mod net;
mod reactor;

use std::net::SocketAddr;

use config::Config;
use reactor::{DatagramEndpoint, ListenerEndpoint, Reactor, Source};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // A peer that disappears mid-write must surface as an EPIPE error on the
    // connection, not kill the process.
    net::ignore_sigpipe();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = net::bind_tcp(addr)?;
    let socket = net::bind_udp(addr)?;

    info!(port = config.port, "Starting echod on TCP and UDP");

    let mut reactor = Reactor::new()?;
    reactor.register(Source::Listener(ListenerEndpoint::new(listener)))?;
    reactor.register(Source::Datagram(DatagramEndpoint::new(socket)))?;

    reactor.run()?;

    info!("Reactor stopped, exiting");
    Ok(())
}
