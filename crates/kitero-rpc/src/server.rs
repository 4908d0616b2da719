//! Thread-per-connection RPC server.
//!
//! One `std::thread` per accepted connection, a single
//! `std::sync::Mutex<Router>` ("router_lock") serializing access to the
//! router across every connection, and blocking I/O throughout — no
//! async runtime here, even though other crates in this workspace reach
//! for `tokio`.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;

use kitero_core::Router;
use thiserror::Error;

use crate::methods::dispatch;
use crate::protocol::{decode_request, encode_result};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind RPC listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("bind address resolved to no addresses")]
    NoAddress,
}

/// A bound, not-yet-running RPC listener.
pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Binds with `SO_REUSEADDR` set before `bind(2)`, so a restarted
    /// helper does not have to wait out `TIME_WAIT` on the old socket.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, ServerError> {
        let addr: SocketAddr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(ServerError::NoAddress)?;
        let domain = if addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, handling each on its own thread.
    /// Never returns under normal operation; a connection whose accept
    /// fails is logged and skipped rather than aborting the server.
    pub fn serve(self, router: Arc<Mutex<Router>>) -> ! {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "RPC server listening");
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let router = Arc::clone(&router);
                    thread::spawn(move || {
                        tracing::debug!(%peer, "accepted RPC connection");
                        handle_connection(stream, router);
                        tracing::debug!(%peer, "RPC connection closed");
                    });
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to accept RPC connection");
                }
            }
        }
    }
}

fn handle_connection(stream: TcpStream, router: Arc<Mutex<Router>>) {
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(err) => {
            tracing::warn!(error = %err, "could not clone RPC stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "error reading RPC request");
                break;
            }
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        let result = decode_request(trimmed).and_then(|(method, args)| {
            tracing::debug!(method = %method, "executing RPC method");
            let mut router = router.lock().expect("router_lock poisoned");
            dispatch(&mut router, &method, args)
        });
        let response = encode_result(result);
        if writeln!(writer, "{response}").is_err() {
            break;
        }
    }
}
