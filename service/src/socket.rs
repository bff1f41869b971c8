//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! Socket seams
//!
//! The event loop never awaits a socket directly. It polls readiness through [`Socket`] and
//! [`Listener`] inside one `poll_fn`, then performs non-blocking `try_read`/`try_write`
//! calls. Tokio's TCP types implement both traits; [`crate::testing`] provides in-memory
//! versions.

use crate::config::ServerConfig;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

/// A non-blocking byte stream owned by one connection
pub trait Socket {
    /// Registers interest in, or reports, read readiness
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Registers interest in, or reports, write readiness
    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Reads without blocking; `Ok(0)` means end of stream
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes without blocking
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// A source of new connections
pub trait Listener {
    /// Accepts one pending connection, if any
    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(Box<dyn Socket>, SocketAddr)>>;

    /// Address the listener is bound to
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Socket for TcpStream {
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_read_ready(self, cx)
    }

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_write_ready(self, cx)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

impl Listener for TcpListener {
    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(Box<dyn Socket>, SocketAddr)>> {
        match TcpListener::poll_accept(self, cx) {
            Poll::Ready(Ok((stream, addr))) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {addr}: {err}");
                }
                Poll::Ready(Ok((Box::new(stream), addr)))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Binds the listening socket with `SO_REUSEADDR` and the configured backlog
///
/// Must be called from within a tokio runtime.
pub fn bind(config: &ServerConfig) -> io::Result<TcpListener> {
    let addr = config.socket_addr();
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(config.backlog)
}
