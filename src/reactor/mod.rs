//! Single-threaded readiness/completion reactor.
//!
//! Grounded on `tokio-rs-mio`'s `Poll`/`Registry`/`Token` shape for the
//! public surface, and on `examples/other_examples/..._reactor.rs`
//! (`little-tokio`'s `Reactor` singleton, a `HashMap<Token, Waker>`) for the
//! token-to-waker bookkeeping. The fire-and-forget task queue driven by
//! [`Reactor::run`]/[`Reactor::block_on`] is this crate's minimal
//! single-threaded executor — there is no `tokio`/`async-std` dependency
//! anywhere in this crate.

mod waiter;

pub use waiter::IoWaiter;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sys;

pub use sys::Interest;

/// The raw OS descriptor type a [`Registry`] registers interest on. On
/// Windows this matches `windows_sys`' `HANDLE` representation (`isize`),
/// not `std::os::windows::io::RawHandle`, since `sys::windows` talks to
/// IOCP through `windows_sys` directly.
#[cfg(unix)]
pub type RawDescriptor = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawDescriptor = isize;

/// `N >= 32`, per §4.3.
const EVENTS_CAPACITY: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Token(pub usize);

#[cfg(unix)]
impl From<Token> for sys::Token {
    fn from(t: Token) -> sys::Token {
        sys::Token(t.0)
    }
}

#[cfg(unix)]
impl From<sys::Token> for Token {
    fn from(t: sys::Token) -> Token {
        Token(t.0)
    }
}

#[cfg(windows)]
impl From<Token> for sys::Token {
    fn from(t: Token) -> sys::Token {
        sys::Token(t.0)
    }
}

#[cfg(windows)]
impl From<sys::Token> for Token {
    fn from(t: sys::Token) -> Token {
        Token(t.0)
    }
}

type BoxedTask = Pin<Box<dyn Future<Output = ()>>>;

struct Inner {
    selector: sys::Selector,
    waiters: HashMap<Token, Waker>,
    next_token: usize,
    tasks: Vec<Option<BoxedTask>>,
    ready: VecDeque<usize>,
    closed: bool,
}

/// Owns the kernel readiness/completion object and drives it on the thread
/// that calls [`Reactor::run`] (§4.3). Not `Send`/`Sync`: every waiter and
/// every spawned task is pinned to this one thread by design, not merely by
/// accident of its fields.
pub struct Reactor {
    inner: Rc<RefCell<Inner>>,
}

negative_impl::negative_impl! {
    impl !Send for Reactor {}
}
negative_impl::negative_impl! {
    impl !Sync for Reactor {}
}

impl Reactor {
    /// Allocates the kernel object. Each call produces an independent
    /// reactor; §4.3's "replace any prior one atomically for the owning
    /// reactor" is naturally satisfied because ownership of the old
    /// `Reactor` value would have to be given up (moved/dropped) before a
    /// new one replaces it in Rust.
    pub fn create() -> Result<Self> {
        let selector = sys::Selector::new().map_err(Error::from)?;
        Ok(Self {
            inner: Rc::new(RefCell::new(Inner {
                selector,
                waiters: HashMap::new(),
                next_token: 0,
                tasks: Vec::new(),
                ready: VecDeque::new(),
                closed: false,
            })),
        })
    }

    /// A cheap handle other components (`IoWaiter`, `Socket`, `Server`) use
    /// to register interest without borrowing `Reactor` itself.
    pub fn registry(&self) -> Registry {
        Registry {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Spawns a fire-and-forget task. Per §9's noted policy for `task`/
    /// `async` top-level handlers, a panic inside `fut` aborts the process
    /// rather than being swallowed (kept for this component; see DESIGN.md
    /// — `AsyncGenerator` uses a different, capture-and-rethrow policy).
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = inner.tasks.len();
        inner.tasks.push(Some(Box::pin(fut)));
        inner.ready.push_back(id);
    }

    /// Blocking event loop (§4.3). Returns `Ok(())` on graceful [`Reactor::close`];
    /// propagates a fatal kernel error otherwise. Loops forever until one of
    /// those two things happens.
    pub fn run(&self) -> Result<()> {
        let mut events = sys::Events::with_capacity(EVENTS_CAPACITY);
        loop {
            self.drive_ready_tasks();
            if self.inner.borrow().closed {
                tracing::event!(tracing::Level::DEBUG, "reactor closed, run() returning");
                return Ok(());
            }
            let timeout = if self.inner.borrow().ready.is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };
            let poll_result = self.inner.borrow_mut().selector.poll(&mut events, timeout);
            if let Err(e) = poll_result {
                tracing::event!(tracing::Level::ERROR, error = %e, "reactor poll failed");
                return Err(Error::from(e));
            }
            if self.inner.borrow().closed {
                return Ok(());
            }
            self.wake_fired(&events);
        }
    }

    /// Runs `fut` to completion on this reactor, pumping I/O readiness as
    /// needed. This is the crate's own test/demo executor (§A.4) — it is
    /// not a replacement for [`Reactor::run`]'s production event loop.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        let mut fut = Box::pin(fut);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
            self.drive_ready_tasks();
            let mut events = sys::Events::with_capacity(EVENTS_CAPACITY);
            let _ = self
                .inner
                .borrow_mut()
                .selector
                .poll(&mut events, Some(Duration::from_millis(20)));
            self.wake_fired(&events);
        }
    }

    /// Releases the kernel object; an active [`Reactor::run`]/[`Reactor::block_on`]
    /// observes this on its next loop iteration and returns.
    pub fn close(&self) -> Result<()> {
        self.inner.borrow_mut().closed = true;
        Ok(())
    }

    fn wake_fired(&self, events: &sys::Events) {
        let fired: Vec<Token> = events.iter().map(Token::from).collect();
        let mut inner = self.inner.borrow_mut();
        for token in fired {
            if let Some(waker) = inner.waiters.remove(&token) {
                drop(inner);
                waker.wake();
                inner = self.inner.borrow_mut();
            }
        }
    }

    fn drive_ready_tasks(&self) {
        loop {
            let id = match self.inner.borrow_mut().ready.pop_front() {
                Some(id) => id,
                None => break,
            };
            let task = self.inner.borrow_mut().tasks[id].take();
            let Some(mut task) = task else { continue };
            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                inner: Rc::downgrade(&self.inner),
            }));
            let mut cx = Context::from_waker(&waker);
            match task.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {}
                Poll::Pending => {
                    self.inner.borrow_mut().tasks[id] = Some(task);
                }
            }
        }
    }
}

struct TaskWaker {
    id: usize,
    inner: Weak<RefCell<Inner>>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().ready.push_back(self.id);
        }
    }
}

/// A cloneable, non-owning handle used to register/deregister I/O interest
/// against a [`Reactor`] without holding a borrow on it across an `.await`.
#[derive(Clone)]
pub struct Registry {
    inner: Weak<RefCell<Inner>>,
}

impl Registry {
    pub fn alloc_token(&self) -> Token {
        let inner = self.upgrade();
        let mut inner = inner.borrow_mut();
        let t = inner.next_token;
        inner.next_token += 1;
        Token(t)
    }

    pub fn register(
        &self,
        fd: RawDescriptor,
        token: Token,
        interest: Interest,
        waker: Waker,
    ) -> std::io::Result<()> {
        let inner = self.upgrade();
        let mut inner = inner.borrow_mut();
        inner.selector.register(fd, token.into(), interest)?;
        inner.waiters.insert(token, waker);
        Ok(())
    }

    pub fn deregister(&self, fd: RawDescriptor, token: Token) -> std::io::Result<()> {
        let inner = self.upgrade();
        let mut inner = inner.borrow_mut();
        inner.waiters.remove(&token);
        inner.selector.deregister(fd)
    }

    pub fn is_registered(&self, token: Token) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.borrow().waiters.contains_key(&token),
            None => false,
        }
    }

    /// Spawns a fire-and-forget task on the owning reactor, e.g. the
    /// background write loop behind `Socket::send`'s returned
    /// `SingleFuture` (mirrors [`Reactor::spawn`]; see DESIGN.md).
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let inner = self.upgrade();
        let mut inner = inner.borrow_mut();
        let id = inner.tasks.len();
        inner.tasks.push(Some(Box::pin(fut)));
        inner.ready.push_back(id);
    }

    fn upgrade(&self) -> Rc<RefCell<Inner>> {
        self.inner
            .upgrade()
            .expect("registry used after its reactor was dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_close_returns_ok() {
        let reactor = Reactor::create().expect("create");
        reactor.close().expect("close");
        assert!(reactor.run().is_ok());
    }

    #[test]
    fn block_on_drives_a_ready_future() {
        let reactor = Reactor::create().expect("create");
        let value = reactor.block_on(async { 1 + 1 });
        assert_eq!(value, 2);
    }

    #[test]
    fn spawn_runs_before_close_is_observed() {
        let reactor = Reactor::create().expect("create");
        let ran = Rc::new(RefCell::new(false));
        let ran2 = ran.clone();
        reactor.spawn(async move {
            *ran2.borrow_mut() = true;
        });
        reactor.close().unwrap();
        reactor.run().unwrap();
        assert!(*ran.borrow());
    }
}
