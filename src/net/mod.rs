//! Socket/Server adapters (§4.7): `recv` as an async generator of byte
//! slices, `accept` as an async generator of sockets, `send` as a
//! single-value future.
//!
//! Grounded on `tokio-rs-mio`'s `net::tcp::{stream,listener,socket}` for
//! the nonblocking-socket shape, and on `folo::net::tcp_server`'s
//! accept-loop pattern (try the syscall, await readiness on `WouldBlock`,
//! end the stream on a fatal error), simplified to this spec's
//! single-in-flight-accept model (§1 excludes multi-threaded work
//! distribution, so `folo`'s `CONCURRENT_ACCEPT_OPERATIONS` pool has no
//! counterpart here).

mod server;
mod socket;

pub use server::{AcceptErrorPolicy, Server};
pub use socket::{Family, Slice, Socket, SocketOption, SocketType};
