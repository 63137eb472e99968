//! Unix readiness selector, a thin wrapper over `mio::Poll`.
//!
//! Grounded on `tokio-rs-mio`'s own public API (`src/poll.rs`,
//! `src/interests.rs`, `src/event/events.rs`): we depend on the real `mio`
//! crate for the epoll/kqueue FFI itself rather than re-deriving
//! `epoll_event`/`kevent` bindings — this is the idiomatic way the
//! surrounding ecosystem (including tokio itself) gets a portable readiness
//! selector.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub use mio::Interest;
pub use mio::Token;

pub struct Events(mio::Events);

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self(mio::Events::with_capacity(capacity))
    }

    pub fn iter(&self) -> impl Iterator<Item = Token> + '_ {
        self.0.iter().map(|e| e.token())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Selector {
    poll: mio::Poll,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
        })
    }

    /// Registers one-shot interest in `fd`. The caller deregisters (or lets
    /// the OS drop registration on fd close) once the event has fired —
    /// mio has no implicit one-shot flag, so the waiter removes its own
    /// registration after each delivery (§4.4: "deregisters itself before
    /// resuming its continuation").
    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut mio::unix::SourceFd(&fd), token, interest)
    }

    pub fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.poll
            .registry()
            .reregister(&mut mio::unix::SourceFd(&fd), token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut mio::unix::SourceFd(&fd))
    }

    /// Blocks for up to `timeout` (or forever if `None`). `Interrupted`
    /// (`EINTR`) is swallowed here: §4.3 treats a signal interruption as
    /// "no event, keep looping", not shutdown.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut events.0, timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }
}
