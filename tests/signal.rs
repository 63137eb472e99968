//! Self-pipe signal dispatch (spec §6, supplemented per SPEC_FULL.md §B.4).
//! Raises `SIGUSR1` against the current process and checks the registered
//! handler runs on the reactor thread, not inside the signal handler itself.

#![cfg(unix)]

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use pulsio::Reactor;

const SIGUSR1: i32 = 10;

/// Polls `flag` on every `Reactor::block_on` iteration (roughly every 20ms
/// of selector polling) until it is set or `max_polls` is exhausted.
struct WaitForFlag<'a> {
    flag: &'a Cell<bool>,
    polls_left: Cell<u32>,
}

impl Future for WaitForFlag<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.flag.get() {
            return Poll::Ready(());
        }
        let left = self.polls_left.get();
        if left == 0 {
            return Poll::Ready(());
        }
        self.polls_left.set(left - 1);
        Poll::Pending
    }
}

#[test]
fn signal_handler_runs_on_reactor_after_raise() {
    let reactor = Reactor::create().expect("reactor create");
    let registry = reactor.registry();

    let fired = Rc::new(Cell::new(false));
    let fired_in_handler = fired.clone();
    pulsio::signal(
        registry,
        SIGUSR1,
        Some(move || fired_in_handler.set(true)),
    )
    .expect("install signal handler");

    unsafe {
        libc::raise(SIGUSR1);
    }

    reactor.block_on(WaitForFlag {
        flag: &fired,
        polls_left: Cell::new(250),
    });

    assert!(fired.get(), "handler must run before the deadline");
}
