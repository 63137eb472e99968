//! Windows selector shell: owns a bare IOCP handle and a
//! `GetQueuedCompletionStatusEx` poll loop, grounded on
//! `folo::io::completion_port::CompletionPort`'s shape.
//!
//! Not a working completion path. §4.4's "Completion (IOCP)" flavor needs
//! every socket individually associated with the port (`CreateIoCompletionPort`
//! per-handle) and every `recv`/`send`/`accept` submitted as a real
//! overlapped `WSARecv`/`WSASend`/`AcceptEx` call whose completion is what
//! `GetQueuedCompletionStatusEx` reports back. None of that is wired up:
//! `register`/`reregister`/`deregister` below are no-ops, `net::socket`/
//! `net::server` run the exact same nonblocking-retry-on-`WouldBlock` code
//! on this platform as on Unix, and no socket is ever associated with
//! `Selector::port`. A `Reactor` will construct and `poll()` this selector
//! without erroring, but no I/O waiter registered against it will ever see
//! a real completion — `GetQueuedCompletionStatusEx` always times out. This
//! module is kept as the shape a genuine Windows backend would take, not as
//! working support; see DESIGN.md.

use std::io;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatusEx, OVERLAPPED_ENTRY,
};

/// Not a real interest mask on completion platforms — kept so call sites
/// shared with `sys::unix` compile unchanged. §4.4 "Completion (IOCP)":
/// the I/O is launched eagerly, there is no separate interest to register.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interest(());

impl Interest {
    pub const READABLE: Interest = Interest(());
    pub const WRITABLE: Interest = Interest(());
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

pub struct Events {
    entries: Vec<OVERLAPPED_ENTRY>,
    ready: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: vec![unsafe { std::mem::zeroed() }; capacity],
            ready: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Token> + '_ {
        self.entries[..self.ready]
            .iter()
            .map(|e| Token(e.lpCompletionKey))
    }

    pub fn is_empty(&self) -> bool {
        self.ready == 0
    }
}

pub struct Selector {
    port: HANDLE,
}

// The IOCP handle is safe to share between the reactor thread and whichever
// thread submits an overlapped operation; `Reactor` itself stays !Send,
// this impl only avoids an unnecessary unsafe-impl at the call site.
unsafe impl Send for Selector {}

impl Selector {
    pub fn new() -> io::Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 1) };
        if port == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { port })
    }

    /// No-op: see the module doc comment. A real backend would associate
    /// the socket handle with `self.port` here and submit its first
    /// overlapped operation; this one just lets registration "succeed" so
    /// callers behave the same on every platform, with no working I/O
    /// behind it.
    pub fn register(&self, _fd: isize, _token: Token, _interest: Interest) -> io::Result<()> {
        Ok(())
    }

    pub fn reregister(&self, _fd: isize, _token: Token, _interest: Interest) -> io::Result<()> {
        Ok(())
    }

    pub fn deregister(&self, _fd: isize) -> io::Result<()> {
        Ok(())
    }

    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let millis = timeout.map_or(u32::MAX, |d| d.as_millis().min(u32::MAX as u128) as u32);
        let mut removed: u32 = 0;
        let ok = unsafe {
            GetQueuedCompletionStatusEx(
                self.port,
                events.entries.as_mut_ptr(),
                events.entries.len() as u32,
                &mut removed,
                millis,
                0,
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::TimedOut {
                events.ready = 0;
                return Ok(());
            }
            return Err(err);
        }
        events.ready = removed as usize;
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}
