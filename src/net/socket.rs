//! Nonblocking TCP/UDP socket wrapping `socket2`, exposing `recv` as an
//! async generator of byte slices and `send` as a single-value future
//! (§4.7).

use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::error::{Error, ErrorKind};
use crate::gen::{self, AsyncGenerator, SingleFuture};
use crate::handle::{Close, Handle};
use crate::reactor::{Interest, IoWaiter, Registry};

#[cfg(unix)]
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{FromRawSocket, IntoRawSocket, RawSocket};

#[cfg(unix)]
pub type RawSocketFd = RawFd;
#[cfg(windows)]
pub type RawSocketFd = RawSocket;

/// `Socket::create`'s address family (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketType {
    Tcp,
    Udp,
}

/// Options settable via `Socket::set` (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketOption {
    NoDelay,
}

pub(crate) struct SocketClose;

impl Close<RawSocketFd> for SocketClose {
    #[cfg(unix)]
    const INVALID: RawSocketFd = -1;
    #[cfg(windows)]
    const INVALID: RawSocketFd = RawSocket::MAX;

    fn close(value: RawSocketFd) {
        #[cfg(unix)]
        unsafe {
            libc::close(value);
        }
        #[cfg(windows)]
        unsafe {
            windows_sys::Win32::Networking::WinSock::closesocket(value as usize);
        }
    }
}

/// A chunk of bytes produced by one `recv` pull. Borrows from the shared
/// buffer the caller supplied to `Socket::recv` — "a slice of the first
/// `n` bytes of the caller-owned buffer" (§4.7).
pub struct Slice {
    buf: Rc<RefCell<Vec<u8>>>,
    len: usize,
}

impl Slice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.buf.borrow();
        f(&buf[..self.len])
    }
}

struct SocketInner {
    handle: RefCell<Handle<RawSocketFd, SocketClose>>,
    last_error: Cell<ErrorKind>,
}

#[cfg(unix)]
pub(crate) fn borrow_socket2(fd: RawSocketFd) -> ManuallyDrop<socket2::Socket> {
    ManuallyDrop::new(unsafe { socket2::Socket::from_raw_fd(fd) })
}
#[cfg(windows)]
pub(crate) fn borrow_socket2(fd: RawSocketFd) -> ManuallyDrop<socket2::Socket> {
    ManuallyDrop::new(unsafe { socket2::Socket::from_raw_socket(fd) })
}

/// A nonblocking socket. Owns exactly one descriptor, closed via its
/// internal [`Handle`] on drop.
pub struct Socket {
    inner: Rc<SocketInner>,
    registry: Registry,
}

impl Socket {
    pub fn create(
        registry: Registry,
        family: Family,
        socket_type: SocketType,
        protocol: i32,
    ) -> crate::Result<Self> {
        let domain = match family {
            Family::V4 => socket2::Domain::IPV4,
            Family::V6 => socket2::Domain::IPV6,
        };
        let ty = match socket_type {
            SocketType::Tcp => socket2::Type::STREAM,
            SocketType::Udp => socket2::Type::DGRAM,
        };
        let proto = if protocol == 0 {
            None
        } else {
            Some(socket2::Protocol::from(protocol))
        };
        let sock = socket2::Socket::new(domain, ty, proto).map_err(Error::Os)?;
        sock.set_nonblocking(true).map_err(Error::Os)?;
        #[cfg(unix)]
        let fd = sock.into_raw_fd();
        #[cfg(windows)]
        let fd = sock.into_raw_socket();

        tracing::event!(tracing::Level::TRACE, ?fd, "socket created");
        Ok(Self::from_raw(registry, fd))
    }

    pub(crate) fn from_raw(registry: Registry, fd: RawSocketFd) -> Self {
        Self {
            inner: Rc::new(SocketInner {
                handle: RefCell::new(Handle::new(fd)),
                last_error: Cell::new(ErrorKind::None),
            }),
            registry,
        }
    }

    pub(crate) fn raw(&self) -> RawSocketFd {
        self.inner.handle.borrow().value()
    }

    pub(crate) fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Not part of the spec's public surface (connection setup is an
    /// external collaborator per §1), but needed to drive a client side in
    /// tests. A nonblocking connect reports `WouldBlock`/`EINPROGRESS`;
    /// both are treated as "in progress, await writability" by the caller.
    pub fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        match borrow_socket2(self.raw()).connect(&addr.into()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn set(&self, option: SocketOption, value: bool) -> crate::Result<()> {
        match option {
            SocketOption::NoDelay => borrow_socket2(self.raw()).set_nodelay(value).map_err(Error::Os),
        }
    }

    pub fn last_error(&self) -> ErrorKind {
        self.inner.last_error.get()
    }

    /// Shuts down both directions, then closes the descriptor (§4.7).
    pub fn close(&self) {
        let _ = borrow_socket2(self.raw()).shutdown(std::net::Shutdown::Both);
        self.inner.handle.borrow_mut().reset(SocketClose::INVALID);
    }

    /// Each pull performs one nonblocking read, awaiting readability on
    /// `WouldBlock`. Ends the stream on EOF (`last_error = Eof`) or any
    /// other error (`last_error = Os`). The caller must not issue
    /// overlapping pulls against the same buffer (§4.7).
    pub fn recv(&self, buf: Rc<RefCell<Vec<u8>>>) -> AsyncGenerator<Slice> {
        let inner = self.inner.clone();
        let registry = self.registry.clone();
        AsyncGenerator::new(move |y| async move {
            loop {
                let fd = inner.handle.borrow().value();
                let read_result = {
                    let mut guard = buf.borrow_mut();
                    let mut socket = borrow_socket2(fd);
                    socket.read(&mut guard[..])
                };
                match read_result {
                    Ok(0) => {
                        inner.last_error.set(ErrorKind::Eof);
                        tracing::event!(tracing::Level::TRACE, ?fd, "recv: eof");
                        return;
                    }
                    Ok(n) => {
                        y.yield_value(Slice {
                            buf: buf.clone(),
                            len: n,
                        })
                        .await;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        IoWaiter::new(registry.clone(), fd, Interest::READABLE).await;
                    }
                    Err(e) => {
                        tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "recv failed");
                        inner.last_error.set(ErrorKind::Os);
                        return;
                    }
                }
            }
        })
    }

    /// Writes the full message, looping over partial writes and awaiting
    /// writability as needed. Resolves with `Ok(())` on success, `Eof` if
    /// the peer closed mid-write, `Cancelled` if `close()` runs while the
    /// write is in flight, `Os(code)` otherwise (§4.7). The write loop runs
    /// as a background task on the owning reactor so the returned
    /// `SingleFuture` can be awaited (or dropped) independently of how it
    /// gets driven (see DESIGN.md). The descriptor is re-read from the
    /// `Handle` on every iteration, like `recv`, rather than captured once
    /// by value — `close()` invalidates the handle out from under an
    /// in-flight write instead of leaving it writing through a descriptor
    /// the OS may since have reused (§5: one owning handle per descriptor).
    pub fn send(&self, bytes: Rc<Vec<u8>>) -> SingleFuture<crate::Result<()>> {
        let inner = self.inner.clone();
        let registry = self.registry.clone();
        let (tx, rx) = gen::producer();
        registry.spawn(async move {
            let mut offset = 0usize;
            loop {
                if offset == bytes.len() {
                    tx.set(Ok(()));
                    return;
                }
                let handle = inner.handle.borrow();
                if !handle.valid() {
                    inner.last_error.set(ErrorKind::Cancelled);
                    tx.set(Err(Error::Cancelled));
                    return;
                }
                let fd = handle.value();
                drop(handle);
                let write_result = borrow_socket2(fd).write(&bytes[offset..]);
                match write_result {
                    Ok(0) => {
                        inner.last_error.set(ErrorKind::Eof);
                        tx.set(Err(Error::Eof));
                        return;
                    }
                    Ok(n) => offset += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        IoWaiter::new(registry.clone(), fd, Interest::WRITABLE).await;
                    }
                    Err(e) => {
                        inner.last_error.set(ErrorKind::Os);
                        tx.set(Err(Error::Os(e)));
                        return;
                    }
                }
            }
        });
        rx
    }
}
