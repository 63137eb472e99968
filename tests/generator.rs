//! Async generator scenarios against the public surface only (spec §8 S4,
//! S5). The state-machine internals have their own unit tests beside
//! `src/gen/mod.rs`; these confirm the same properties hold through
//! `pulsio::AsyncGenerator` as a library consumer would observe them.

use std::cell::Cell;
use std::rc::Rc;

use futures::StreamExt;
use pulsio::AsyncGenerator;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    use std::task::{Context, Poll};
    let waker = futures::task::noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut fut = Box::pin(fut);
    loop {
        if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
            return v;
        }
    }
}

#[test]
fn s4_generator_drop_mid_stream_runs_destructor() {
    struct DropFlag(Rc<Cell<bool>>);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    let dropped = Rc::new(Cell::new(false));
    let dropped_in_body = dropped.clone();
    let mut gen: AsyncGenerator<i32> = AsyncGenerator::new(move |y| async move {
        let _guard = DropFlag(dropped_in_body);
        let mut i = 0;
        loop {
            y.yield_value(i).await;
            i += 1;
        }
    });

    assert_eq!(block_on(gen.next()), Some(0));
    assert!(!dropped.get(), "producer must still be alive after one pull");
    drop(gen);
    assert!(dropped.get(), "dropping the generator must destroy the producer frame");
}

#[test]
#[should_panic(expected = "producer exploded")]
fn s5_producer_panic_surfaces_on_next_advance() {
    let mut gen: AsyncGenerator<i32> = AsyncGenerator::new(|y| async move {
        y.yield_value(1).await;
        panic!("producer exploded");
    });

    assert_eq!(block_on(gen.next()), Some(1));
    // The panic is captured during this advance and rethrown here, not
    // silently swallowed or deferred further.
    let _ = block_on(gen.next());
}

#[test]
fn single_delivery_exactly_one_item_or_end_per_advance() {
    let mut gen: AsyncGenerator<i32> = AsyncGenerator::new(|y| async move {
        y.yield_value(10).await;
        y.yield_value(20).await;
    });

    assert_eq!(block_on(gen.next()), Some(10));
    assert_eq!(block_on(gen.next()), Some(20));
    assert_eq!(block_on(gen.next()), None);
    assert_eq!(block_on(gen.next()), None);
    assert!(gen.is_terminal());
}
