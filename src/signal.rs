//! Process-wide signal dispatch (§6, §9; supplemented per SPEC_FULL.md
//! §B.4).
//!
//! The C++ reference (`coronet::signal`) invokes the user handler directly
//! from the raw OS signal context, under a mutex — a documented
//! signal-safety risk (arbitrary Rust code, including allocation and
//! locking, is not safe to run inside a signal handler). This port instead
//! follows the self-pipe pattern from `signal-hook`'s
//! `low_level::pipe` module (see `examples/other_examples/..._pipe.rs`):
//! the raw handler does nothing but write one byte to a pre-registered
//! pipe; a reactor-driven task reads it back and invokes the registered
//! closure with no lock held.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::reactor::{Interest, IoWaiter, Registry};

static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

thread_local! {
    static HANDLERS: RefCell<HashMap<i32, Rc<dyn Fn()>>> = RefCell::new(HashMap::new());
    static READER_INSTALLED: Cell<bool> = const { Cell::new(false) };
}

/// Registers `handler` to run (on the reactor behind `registry`) whenever
/// signal `num` arrives. Passing `None` restores the default
/// "ignore" disposition (§6).
pub fn signal<F>(registry: Registry, num: i32, handler: Option<F>) -> crate::Result<()>
where
    F: Fn() + 'static,
{
    ensure_pipe_and_reader(&registry)?;

    HANDLERS.with(|h| match &handler {
        Some(_) => {
            h.borrow_mut()
                .insert(num, Rc::new(handler.unwrap()) as Rc<dyn Fn()>);
        }
        None => {
            h.borrow_mut().remove(&num);
        }
    });

    install_os_handler(num, handler.is_some())
}

fn ensure_pipe_and_reader(registry: &Registry) -> crate::Result<()> {
    if READER_INSTALLED.with(Cell::get) {
        return Ok(());
    }
    READER_INSTALLED.with(|c| c.set(true));

    let (read_fd, write_fd) = create_self_pipe()?;
    WRITE_FD.store(write_fd, Ordering::Release);

    let registry = registry.clone();
    registry.spawn(async move {
        let mut byte = [0u8; 1];
        loop {
            match read_one(read_fd, &mut byte) {
                Ok(Some(signum)) => {
                    let handler = HANDLERS.with(|h| h.borrow().get(&(signum as i32)).cloned());
                    if let Some(handler) = handler {
                        tracing::event!(tracing::Level::DEBUG, signum, "dispatching signal");
                        handler();
                    }
                }
                Ok(None) => {}
                Err(_) => return,
            }
            IoWaiter::new(registry.clone(), read_fd, Interest::READABLE).await;
        }
    });
    Ok(())
}

fn read_one(fd: i32, buf: &mut [u8; 1]) -> io::Result<Option<u8>> {
    #[cfg(unix)]
    unsafe {
        let n = libc::read(fd, buf.as_mut_ptr() as *mut _, 1);
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::other("self-pipe closed"));
        }
        Ok(Some(buf[0]))
    }
    #[cfg(windows)]
    {
        let _ = (fd, buf);
        Ok(None)
    }
}

#[cfg(unix)]
fn create_self_pipe() -> crate::Result<(i32, i32)> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(crate::Error::Os(io::Error::last_os_error()));
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            let fdflags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, fdflags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

#[cfg(windows)]
fn create_self_pipe() -> crate::Result<(i32, i32)> {
    // No raw-signal relay is installed on Windows (Ctrl events are
    // delivered via `SetConsoleCtrlHandler`, not `SIGINT`); the pipe is
    // unused there. Kept so `ensure_pipe_and_reader`'s shape matches unix.
    Ok((-1, -1))
}

extern "C" fn relay(signum: i32) {
    let fd = WRITE_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = [signum as u8];
        #[cfg(unix)]
        unsafe {
            libc::write(fd, byte.as_ptr() as *const _, 1);
        }
    }
}

#[cfg(unix)]
fn install_os_handler(num: i32, relay_to_pipe: bool) -> crate::Result<()> {
    unsafe {
        let handler = if relay_to_pipe {
            relay as usize
        } else {
            libc::SIG_IGN
        };
        if libc::signal(num, handler) == libc::SIG_ERR {
            return Err(crate::Error::Os(io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(windows)]
fn install_os_handler(num: i32, relay_to_pipe: bool) -> crate::Result<()> {
    // Best-effort: Windows has no per-signal-number table; SIGINT (2) maps
    // to a console control handler, everything else is a no-op.
    use windows_sys::Win32::System::Console::{SetConsoleCtrlHandler, CTRL_C_EVENT};

    const SIGINT: i32 = 2;
    if num != SIGINT {
        return Ok(());
    }

    unsafe extern "system" fn handler(ctrl_type: u32) -> i32 {
        if ctrl_type == CTRL_C_EVENT {
            relay(SIGINT);
            1
        } else {
            0
        }
    }

    let installed = if relay_to_pipe {
        unsafe { SetConsoleCtrlHandler(Some(handler), 1) }
    } else {
        unsafe { SetConsoleCtrlHandler(None, 1) }
    };
    if installed == 0 {
        return Err(crate::Error::Os(io::Error::last_os_error()));
    }
    Ok(())
}
