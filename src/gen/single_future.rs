//! `SingleFuture<T>` (§4.5): producer writes once, consumer awaits once.
//!
//! Grounded on the shape `folo::net::tcp_server` gets from `oneshot::channel()`
//! (`startup_completed_tx`/`shutdown_tx`) — write once, await once, resume
//! inline if the write races ahead of the await. This component is named
//! directly in the spec's component table, so it is hand-written here
//! rather than re-exported from the `oneshot` crate.

use std::cell::{Cell, UnsafeCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Inner<T> {
    value: UnsafeCell<Option<T>>,
    waker: UnsafeCell<Option<Waker>>,
    ready: Cell<bool>,
}

/// The producer half. Consumed by [`Producer::set`].
pub struct Producer<T> {
    inner: Rc<Inner<T>>,
}

/// The consumer half; a `Future` that resolves exactly once.
pub struct SingleFuture<T> {
    inner: Rc<Inner<T>>,
    consumed: bool,
}

/// Creates a linked `Producer`/`SingleFuture` pair.
pub fn producer<T>() -> (Producer<T>, SingleFuture<T>) {
    let inner = Rc::new(Inner {
        value: UnsafeCell::new(None),
        waker: UnsafeCell::new(None),
        ready: Cell::new(false),
    });
    (
        Producer {
            inner: inner.clone(),
        },
        SingleFuture {
            inner,
            consumed: false,
        },
    )
}

impl<T> Producer<T> {
    /// Publishes the result. If a consumer is already parked, its waker is
    /// invoked inline; otherwise the value sits ready for the consumer's
    /// first `await` (§4.5: "`await_ready` returns true iff the result slot
    /// is already full").
    pub fn set(self, value: T) {
        unsafe {
            *self.inner.value.get() = Some(value);
        }
        self.inner.ready.set(true);
        let waker = unsafe { (*self.inner.waker.get()).take() };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Future for SingleFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        assert!(
            !this.consumed,
            "SingleFuture polled again after already producing its value"
        );
        if this.inner.ready.get() {
            this.consumed = true;
            let value = unsafe {
                (*this.inner.value.get())
                    .take()
                    .expect("ready implies a value is present")
            };
            Poll::Ready(value)
        } else {
            unsafe {
                *this.inner.waker.get() = Some(cx.waker().clone());
            }
            Poll::Pending
        }
    }
}

negative_impl::negative_impl! {
    impl<T> !Send for Producer<T> {}
}
negative_impl::negative_impl! {
    impl<T> !Sync for Producer<T> {}
}
negative_impl::negative_impl! {
    impl<T> !Send for SingleFuture<T> {}
}
negative_impl::negative_impl! {
    impl<T> !Sync for SingleFuture<T> {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn inline_resume_when_value_already_set() {
        let (tx, mut rx) = producer::<u32>();
        tx.set(7);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut rx).poll(&mut cx) {
            Poll::Ready(v) => assert_eq!(v, 7),
            Poll::Pending => panic!("expected Ready"),
        }
    }

    #[test]
    fn parks_then_resumes_on_set() {
        let (tx, mut rx) = producer::<&'static str>();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(matches!(Pin::new(&mut rx).poll(&mut cx), Poll::Pending));
        tx.set("done");
        match Pin::new(&mut rx).poll(&mut cx) {
            Poll::Ready(v) => assert_eq!(v, "done"),
            Poll::Pending => panic!("expected Ready after set"),
        }
    }

    #[test]
    #[should_panic(expected = "polled again")]
    fn panics_if_polled_after_ready() {
        let (tx, mut rx) = producer::<u32>();
        tx.set(1);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let _ = Pin::new(&mut rx).poll(&mut cx);
        let _ = Pin::new(&mut rx).poll(&mut cx);
    }
}
