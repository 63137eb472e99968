//! Listening socket: `accept` as an async generator of [`Socket`]s (§4.7).

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::io;
use std::net::ToSocketAddrs;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, ErrorKind};
use crate::gen::AsyncGenerator;
use crate::handle::Handle;
use crate::net::socket::{RawSocketFd, Socket, SocketClose};
use crate::net::SocketType;
use crate::reactor::{Interest, IoWaiter, Registry};

/// §9's open question on accept-loop error filtering: the spec's source
/// treats any non-`WouldBlock` accept failure as fatal. `Fatal` reproduces
/// that default; `Ignore` skips the transient, per-connection error
/// classes real-world servers tolerate (`ECONNABORTED`, `EMFILE`,
/// `ENFILE`), logging and retrying instead of ending the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptErrorPolicy {
    Fatal,
    Ignore,
}

impl Default for AcceptErrorPolicy {
    fn default() -> Self {
        AcceptErrorPolicy::Fatal
    }
}

#[cfg(unix)]
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::ECONNABORTED) | Some(libc::EMFILE) | Some(libc::ENFILE)
    )
}
#[cfg(windows)]
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(code) if code == windows_sys::Win32::Networking::WinSock::WSAECONNABORTED as i32
    )
}

struct ServerInner {
    listener: RefCell<Handle<RawSocketFd, SocketClose>>,
    last_error: Cell<ErrorKind>,
    listening: Cell<bool>,
    stopped: Cell<bool>,
    accept_policy: Cell<AcceptErrorPolicy>,
    parked_waker: RefCell<Option<Waker>>,
}

/// A nonblocking listening socket.
pub struct Server {
    inner: Rc<ServerInner>,
    registry: Registry,
}

impl Server {
    /// Resolves `host:port` (the external `getaddrinfo`-style collaborator
    /// per §1 is, here, `std::net::ToSocketAddrs`), creates a nonblocking
    /// listening socket, sets `SO_REUSEADDR`, and binds. Does not yet
    /// listen (§4.7: deferred to `accept`).
    pub fn create(
        registry: Registry,
        host: &str,
        port: u16,
        socket_type: SocketType,
    ) -> crate::Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(Error::Addr)?
            .next()
            .ok_or_else(|| Error::Addr(io::Error::other("no addresses resolved")))?;

        let domain = if addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let ty = match socket_type {
            SocketType::Tcp => socket2::Type::STREAM,
            SocketType::Udp => socket2::Type::DGRAM,
        };
        let sock = socket2::Socket::new(domain, ty, None).map_err(Error::Os)?;
        sock.set_reuse_address(true).map_err(Error::Os)?;
        sock.set_nonblocking(true).map_err(Error::Os)?;
        sock.bind(&addr.into()).map_err(Error::Os)?;

        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::IntoRawFd;
            sock.into_raw_fd()
        };
        #[cfg(windows)]
        let fd = {
            use std::os::windows::io::IntoRawSocket;
            sock.into_raw_socket()
        };

        tracing::event!(tracing::Level::DEBUG, %addr, "server bound");

        Ok(Self {
            inner: Rc::new(ServerInner {
                listener: RefCell::new(Handle::new(fd)),
                last_error: Cell::new(ErrorKind::None),
                listening: Cell::new(false),
                stopped: Cell::new(false),
                accept_policy: Cell::new(AcceptErrorPolicy::default()),
                parked_waker: RefCell::new(None),
            }),
            registry,
        })
    }

    /// The local address actually bound, useful for tests that bind to
    /// an ephemeral port (`:0`).
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        crate::net::socket::borrow_socket2(self.inner.listener.borrow().value())
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::other("not an IP socket address"))
    }

    pub fn set_accept_policy(&self, policy: AcceptErrorPolicy) {
        self.inner.accept_policy.set(policy);
    }

    pub fn last_error(&self) -> ErrorKind {
        self.inner.last_error.get()
    }

    /// Starts listening (idempotent) and returns an async generator that
    /// accepts one connection per pull (§4.7).
    pub fn accept(&self, backlog: Option<i32>) -> crate::Result<AsyncGenerator<Socket>> {
        if !self.inner.listening.get() {
            let fd = self.inner.listener.borrow().value();
            crate::net::socket::borrow_socket2(fd)
                .listen(backlog.unwrap_or(128))
                .map_err(Error::Os)?;
            self.inner.listening.set(true);
            tracing::event!(tracing::Level::DEBUG, "server listening");
        }

        let inner = self.inner.clone();
        let registry = self.registry.clone();
        Ok(AsyncGenerator::new(move |y| async move {
            loop {
                if inner.stopped.get() {
                    inner.last_error.set(ErrorKind::Cancelled);
                    return;
                }
                let fd = inner.listener.borrow().value();
                let accept_result = crate::net::socket::borrow_socket2(fd).accept();
                match accept_result {
                    Ok((accepted, _addr)) => {
                        #[cfg(unix)]
                        let accepted_fd = {
                            use std::os::unix::io::IntoRawFd;
                            accepted.into_raw_fd()
                        };
                        #[cfg(windows)]
                        let accepted_fd = {
                            use std::os::windows::io::IntoRawSocket;
                            accepted.into_raw_socket()
                        };
                        let socket = Socket::from_raw(registry.clone(), accepted_fd);
                        y.yield_value(socket).await;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        AcceptPark {
                            inner: inner.clone(),
                            waiter: IoWaiter::new(registry.clone(), fd, Interest::READABLE),
                        }
                        .await;
                    }
                    Err(e) if is_transient_accept_error(&e)
                        && inner.accept_policy.get() == AcceptErrorPolicy::Ignore =>
                    {
                        tracing::event!(
                            tracing::Level::TRACE,
                            error = %e.to_string().to_lowercase(),
                            "ignoring transient accept error"
                        );
                    }
                    Err(e) => {
                        tracing::event!(
                            tracing::Level::ERROR,
                            error = %e.to_string().to_lowercase(),
                            "accept failed"
                        );
                        inner.last_error.set(ErrorKind::Os);
                        return;
                    }
                }
            }
        }))
    }

    /// Closes the listening socket; any in-flight accept stream ends with
    /// `Cancelled` (§4.7).
    pub fn stop(&self) {
        self.inner.stopped.set(true);
        self.inner
            .listener
            .borrow_mut()
            .reset(crate::net::socket::SocketClose::INVALID);
        if let Some(waker) = self.inner.parked_waker.borrow_mut().take() {
            waker.wake();
        }
        tracing::event!(tracing::Level::DEBUG, "server stopped");
    }
}

/// Parks the accept loop on `waiter` while recording the current task's
/// waker on every poll, so `stop()` can force a wake with no real kernel
/// event behind it. Crucially, `stopped` is rechecked on *each* poll before
/// `waiter` is consulted: once the listening socket is closed no further
/// readiness event will ever arrive for it, so if this just delegated to
/// `waiter.poll()` unconditionally, a `stop()` that raced a parked accept
/// (rather than one that happened to land between two ready connections)
/// would wake the task only to see the `IoWaiter` report `Pending` again,
/// hanging the generator forever instead of ending it with `Cancelled`
/// (§4.7).
struct AcceptPark {
    inner: Rc<ServerInner>,
    waiter: IoWaiter,
}

impl Future for AcceptPark {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        *this.inner.parked_waker.borrow_mut() = Some(cx.waker().clone());
        if this.inner.stopped.get() {
            return Poll::Ready(());
        }
        Pin::new(&mut this.waiter).poll(cx)
    }
}
