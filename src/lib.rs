//! A small single-threaded TCP runtime built around an async-generator
//! handshake over the host's readiness/completion facility (epoll, kqueue,
//! or IOCP).
//!
//! The reactor drives exactly one event loop on the thread that calls
//! [`Reactor::run`]. Everything above it — [`Socket::recv`], [`Server::accept`]
//! — is expressed as an [`AsyncGenerator`], a suspendable producer/consumer
//! pair that hands values to ordinary `while let Some(x) = gen.next().await`
//! iteration.

mod handle;
mod error;
mod reactor;
mod signal;
mod sys;

pub mod gen;
pub mod net;

pub use error::{Error, ErrorKind, Result};
pub use handle::Handle;
pub use reactor::{Reactor, Registry, Token};
pub use signal::signal;

pub use gen::{AsyncGenerator, SingleFuture};
pub use net::{Family, Server, Socket, SocketOption, SocketType};
