//! Listener Module
//!
//! Owns the bound, listening TCP socket. The socket is created with socket2
//! so the listen backlog can be chosen, then handed to async-std.

use crate::utils::error::{RexecError, Result, SetupStage};
use async_std::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};

/// What the accept loop does with a failed accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptDisposition {
    /// Interrupted system call, try again silently
    Retry,
    /// The pending connection died before it was accepted, move on
    Skip,
    /// The listener itself is unusable
    Fatal,
}

/// Sort an accept failure into retry, skip or fatal
pub fn classify_accept_error(error: &io::Error) -> AcceptDisposition {
    match error.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => AcceptDisposition::Retry,
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => {
            AcceptDisposition::Skip
        }
        _ => AcceptDisposition::Fatal,
    }
}

/// Call `accept` until it yields a connection or fails for good
///
/// Interrupted accepts are retried and connections that died while queued
/// are skipped; only failures of the listener itself are returned.
pub async fn accept_with<S, F, Fut>(mut accept: F) -> Result<(S, SocketAddr)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, SocketAddr)>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return Ok(accepted),
            Err(e) => match classify_accept_error(&e) {
                AcceptDisposition::Retry => continue,
                AcceptDisposition::Skip => {
                    tracing::warn!(error = %e, "Pending connection dropped before accept");
                    continue;
                }
                AcceptDisposition::Fatal => return Err(RexecError::Accept(e)),
            },
        }
    }
}

/// Bound and listening socket
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to an IPv4 address and start listening
    ///
    /// # Arguments
    /// * `address` - Local address; port 0 picks a free port
    /// * `backlog` - Listen queue length
    ///
    /// # Returns
    /// * `Result<Listener>` - The listener or a setup error naming the failed stage
    pub fn bind(address: SocketAddrV4, backlog: i32) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| RexecError::setup(SetupStage::Socket, e))?;

        // Allow quick restarts while old connections sit in TIME_WAIT
        socket
            .set_reuse_address(true)
            .map_err(|e| RexecError::setup(SetupStage::Socket, e))?;

        socket
            .bind(&SocketAddr::V4(address).into())
            .map_err(|e| RexecError::setup(SetupStage::Bind, e))?;
        socket
            .listen(backlog)
            .map_err(|e| RexecError::setup(SetupStage::Listen, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| RexecError::setup(SetupStage::Listen, e))?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|e| RexecError::setup(SetupStage::Listen, e))?;

        tracing::info!(address = %local_addr, backlog, "Listening");

        Ok(Listener {
            inner: TcpListener::from(std_listener),
            local_addr,
        })
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next connection, see [`accept_with`]
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        accept_with(move || self.inner.accept()).await
    }
}
