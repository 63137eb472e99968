//! Two-party producer/consumer async stream (§4.6) — the core of this
//! crate.
//!
//! Grounded on `examples/original_source/include/coronet/async.h`'s
//! `async_generator` (the `value_`/`await_iterator_`/`await_consumer_`
//! promise fields, `async_iterator`). Because Rust's `async fn` already
//! compiles into a resumable state machine that `AsyncGenerator` drives by
//! calling `Future::poll` directly on its boxed producer, there is no need
//! for the symmetric coroutine-handle transfer the C++ source implements:
//! every resumption — the first pull, or a reactor-driven wake — happens
//! as a nested `poll()` call inside `AsyncGenerator::poll_next`, which is
//! already an inline resume (see DESIGN.md). The five named states are
//! kept (`VNRCA`/`VNRCS`/`VRPA`/`VRPS`/`Cancelled`) because they still
//! carry real information: whether a value is sitting in the control
//! block, whether the consumer is parked awaiting a wake, and the
//! terminal cancelled state the test suite asserts on. `VRPA` is never
//! observed on a single reactor thread; it is reserved for a producer
//! resumed concurrently with a consumer poll on a future multi-threaded
//! reactor (§5's concurrency notes).

mod single_future;

pub use single_future::{producer, Producer, SingleFuture};

use std::cell::UnsafeCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use futures::Stream;

const VNRCA: u8 = 0;
const VNRCS: u8 = 1;
#[allow(dead_code)]
const VRPA: u8 = 2;
const VRPS: u8 = 3;
const CANCELLED: u8 = 4;

struct Shared<T> {
    state: AtomicU8,
    // Single-threaded by construction (`AsyncGenerator`/`Yielder` are both
    // `!Send`/`!Sync`); only the thread that owns the generator ever
    // touches this cell.
    value: UnsafeCell<Option<T>>,
}

/// Handle passed into an [`AsyncGenerator::new`] body, used to emit values.
pub struct Yielder<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Yielder<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Yielder<T> {
    /// Hands `value` to the consumer and suspends until it has been taken.
    pub async fn yield_value(&self, value: T) {
        YieldOnce {
            shared: &self.shared,
            value: Some(value),
            delivered: false,
        }
        .await
    }
}

struct YieldOnce<'a, T> {
    shared: &'a Shared<T>,
    value: Option<T>,
    delivered: bool,
}

impl<T> Future for YieldOnce<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.shared.state.load(Ordering::Acquire) == CANCELLED {
            return Poll::Ready(());
        }
        if !this.delivered {
            unsafe {
                *this.shared.value.get() = this.value.take();
            }
            this.shared.state.store(VRPS, Ordering::Release);
            this.delivered = true;
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// A suspendable producer/consumer stream (§2 "Async generator").
///
/// Construct one with [`AsyncGenerator::new`], passing an `async` body that
/// receives a [`Yielder`] and calls `.yield_value(v).await` at each value.
/// Iterate it with [`futures::StreamExt`].
pub struct AsyncGenerator<T> {
    shared: Rc<Shared<T>>,
    producer: Option<Pin<Box<dyn Future<Output = ()>>>>,
}

negative_impl::negative_impl! {
    impl<T> !Send for AsyncGenerator<T> {}
}
negative_impl::negative_impl! {
    impl<T> !Sync for AsyncGenerator<T> {}
}

impl<T: 'static> AsyncGenerator<T> {
    /// The body runs lazily: nothing executes until the first poll (§3:
    /// "created suspended... iteration begins on first `begin`").
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let shared = Rc::new(Shared {
            state: AtomicU8::new(VRPS),
            value: UnsafeCell::new(None),
        });
        let yielder = Yielder {
            shared: shared.clone(),
        };
        let fut = body(yielder);
        Self {
            shared,
            producer: Some(Box::pin(fut)),
        }
    }

    /// `true` once the producer frame has been destroyed, either by
    /// reaching its end or via [`Drop`] (Testable Property 1b/2).
    pub fn is_terminal(&self) -> bool {
        self.producer.is_none()
    }
}

impl<T> Stream for AsyncGenerator<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            if this.producer.is_none() {
                return Poll::Ready(None);
            }

            // Step 1/2 of Advance (§4.6): a value sitting from a previous
            // yield is delivered synchronously, without resuming the
            // producer again this call.
            let pending = unsafe { (*this.shared.value.get()).take() };
            if let Some(value) = pending {
                this.shared.state.store(VNRCA, Ordering::Relaxed);
                return Poll::Ready(Some(value));
            }

            this.shared.state.store(VNRCA, Ordering::Relaxed);
            let producer = this.producer.as_mut().unwrap();
            let poll_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                producer.as_mut().poll(&mut *cx)
            }));

            match poll_result {
                Err(payload) => {
                    // §4.6 "Exception handling": captured during the
                    // producer's unwind, rethrown on the advance that
                    // observed it — which is this call.
                    this.producer = None;
                    this.shared.state.store(CANCELLED, Ordering::Release);
                    std::panic::resume_unwind(payload);
                }
                Ok(Poll::Ready(())) => {
                    this.producer = None;
                    this.shared.state.store(CANCELLED, Ordering::Release);
                    return Poll::Ready(None);
                }
                Ok(Poll::Pending) => {
                    if this.shared.state.load(Ordering::Acquire) == VRPS {
                        // The producer yielded during this very poll;
                        // loop back to deliver it without suspending the
                        // consumer (§4.6 Yield step 1: "resume the
                        // consumer inline").
                        continue;
                    }
                    // Parked somewhere other than a yield point (an
                    // `IoWaiter`, most likely). Park the consumer.
                    match this.shared.state.compare_exchange(
                        VNRCA,
                        VNRCS,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Poll::Pending,
                        Err(_) => continue,
                    }
                }
            }
        }
    }
}

impl<T> Drop for AsyncGenerator<T> {
    fn drop(&mut self) {
        // Marking CANCELLED is for introspection (`is_terminal`,
        // diagnostics); dropping `producer` below collapses its frame
        // immediately regardless of suspension point, which is strictly
        // stronger than "destroyed at its next yield/return" — see
        // DESIGN.md.
        self.shared.state.store(CANCELLED, Ordering::Release);
        self.producer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn block_on<F: Future>(mut fut: F) -> F::Output {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }

    #[test]
    fn delivers_values_in_order_then_ends() {
        let mut gen = AsyncGenerator::new(|y| async move {
            y.yield_value(1).await;
            y.yield_value(2).await;
        });
        assert_eq!(block_on(gen.next()), Some(1));
        assert_eq!(block_on(gen.next()), Some(2));
        assert_eq!(block_on(gen.next()), None);
        assert!(gen.is_terminal());
    }

    #[test]
    fn drop_mid_stream_marks_terminal_and_runs_destructors() {
        struct DropFlag(Rc<std::cell::Cell<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(std::cell::Cell::new(false));
        let dropped2 = dropped.clone();
        let mut gen = AsyncGenerator::new(move |y| async move {
            let _guard = DropFlag(dropped2);
            let mut i = 0;
            loop {
                y.yield_value(i).await;
                i += 1;
            }
        });
        assert_eq!(block_on(gen.next()), Some(0));
        drop(gen);
        assert!(dropped.get());
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn producer_panic_propagates_on_next_advance() {
        let mut gen: AsyncGenerator<i32> = AsyncGenerator::new(|y| async move {
            y.yield_value(1).await;
            panic!("boom");
        });
        assert_eq!(block_on(gen.next()), Some(1));
        let _ = block_on(gen.next());
    }
}
