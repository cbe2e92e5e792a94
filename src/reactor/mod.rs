//! Single-threaded readiness reactor.
//!
//! One `Reactor` owns every active event source in a slab-backed
//! registration table and dispatches readiness notifications to them:
//! - `ListenerEndpoint`: accepts TCP connections, fatal errors stop the loop
//! - `Connection`: per-client byte-exact echo with queued partial writes
//! - `DatagramEndpoint`: per-packet UDP echo
//!
//! All callbacks run on the reactor thread; no source may block.

mod connection;
mod datagram;
mod event_loop;
mod listener;

pub use connection::Connection;
pub use datagram::DatagramEndpoint;
pub use event_loop::{Reactor, RegisterError, Source};
pub use listener::ListenerEndpoint;
