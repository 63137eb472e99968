//! Bundled demo server (§6, §A.3): `[host] [port] [buffer-size]`, defaults
//! `127.0.0.1 8080 40960`. SIGINT closes the reactor; the accept stream
//! then ends and the process exits with the reactor's return code.

use std::cell::RefCell;
use std::env;
use std::process::ExitCode;
use std::rc::Rc;

use futures::StreamExt;

use pulsio::{ErrorKind, Reactor, Server, Socket, SocketOption, SocketType};

const SIGINT: i32 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let buffer_size: usize = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(40960);

    let reactor = match Reactor::create() {
        Ok(r) => Rc::new(r),
        Err(e) => {
            tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "reactor create failed");
            return ExitCode::FAILURE;
        }
    };
    let registry = reactor.registry();

    let server = match Server::create(registry.clone(), &host, port, SocketType::Tcp) {
        Ok(s) => Rc::new(s),
        Err(e) => {
            tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "server create failed");
            return ExitCode::FAILURE;
        }
    };

    let close_on_signal = reactor.clone();
    if let Err(e) = pulsio::signal(
        registry.clone(),
        SIGINT,
        Some(move || {
            tracing::event!(tracing::Level::DEBUG, "SIGINT received, closing reactor");
            let _ = close_on_signal.close();
        }),
    ) {
        tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "signal install failed");
        return ExitCode::FAILURE;
    }

    let accept_server = server.clone();
    let accept_registry = registry.clone();
    registry.spawn(async move {
        let mut stream = match accept_server.accept(None) {
            Ok(s) => s,
            Err(e) => {
                tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "listen failed");
                return;
            }
        };
        while let Some(socket) = stream.next().await {
            accept_registry.spawn(handle_connection(socket, buffer_size));
        }
        let last_error = accept_server.last_error();
        tracing::event!(tracing::Level::DEBUG, ?last_error, "accept stream ended");
    });

    match reactor.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "reactor run failed");
            ExitCode::FAILURE
        }
    }
}

async fn handle_connection(socket: Socket, buffer_size: usize) {
    if let Err(e) = socket.set(SocketOption::NoDelay, true) {
        tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "set nodelay failed");
    }

    let buf = Rc::new(RefCell::new(vec![0u8; buffer_size]));
    let mut stream = socket.recv(buf);
    while let Some(slice) = stream.next().await {
        let bytes = Rc::new(slice.with_bytes(|b| b.to_vec()));
        match socket.send(bytes).await {
            Ok(()) => {}
            Err(e) => {
                tracing::event!(tracing::Level::ERROR, error = %e.to_string().to_lowercase(), "send failed");
                break;
            }
        }
    }
    drop(stream);

    match socket.last_error() {
        ErrorKind::Eof | ErrorKind::None => {}
        kind => tracing::event!(tracing::Level::ERROR, ?kind, "connection ended with error"),
    }
    socket.close();
}
