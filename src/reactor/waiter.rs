//! One-shot readiness waiter (§4.4).
//!
//! `IoWaiter` only waits for readiness; the actual `recv`/`send`/`accept`
//! syscall is retried by the caller once the waiter resolves. This is the
//! same split mio-backed async runtimes use (poll-readiness, then attempt
//! the syscall, then await again on `WouldBlock`) — it lets the state the
//! C++ reference embeds in the waiter's resume handler live instead in the
//! `async fn` body, where Rust already gives a resumable state machine for
//! free (see DESIGN.md).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::{Interest, RawDescriptor, Registry, Token};

pub struct IoWaiter {
    registry: Registry,
    fd: RawDescriptor,
    interest: Interest,
    token: Option<Token>,
}

impl IoWaiter {
    pub fn new(registry: Registry, fd: RawDescriptor, interest: Interest) -> Self {
        Self {
            registry,
            fd,
            interest,
            token: None,
        }
    }
}

impl Future for IoWaiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.token {
            None => {
                let token = this.registry.alloc_token();
                match this.registry.register(this.fd, token, this.interest, cx.waker().clone()) {
                    Ok(()) => {
                        this.token = Some(token);
                        Poll::Pending
                    }
                    Err(e) => {
                        // Registration failure (e.g. the reactor's kernel
                        // object is gone). Report ready so the caller's
                        // retried syscall surfaces the real error.
                        tracing::event!(
                            tracing::Level::TRACE,
                            error = %e,
                            "waiter registration failed, reporting spuriously ready"
                        );
                        Poll::Ready(())
                    }
                }
            }
            Some(token) => {
                if this.registry.is_registered(token) {
                    // Spurious wake: the reactor has not fired this token
                    // yet (it removes the entry when it does).
                    Poll::Pending
                } else {
                    this.token = None;
                    Poll::Ready(())
                }
            }
        }
    }
}

impl Drop for IoWaiter {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            let _ = self.registry.deregister(self.fd, token);
        }
    }
}

negative_impl::negative_impl! {
    impl !Send for IoWaiter {}
}
negative_impl::negative_impl! {
    impl !Sync for IoWaiter {}
}
