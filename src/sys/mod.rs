//! Platform selector shim. `Reactor` only ever talks to the small surface
//! re-exported here; the actual readiness/completion mechanism lives in
//! `unix.rs` (backed by the published `mio` crate) or `windows.rs` (raw
//! IOCP, grounded in `folo::io::completion_port`).

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{Events, Interest, Selector, Token};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{Events, Interest, Selector, Token};
