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


//! In-memory doubles for driving the event loop in tests
//!
//! Every double is a cheap handle over shared state: keep one clone as the "client side"
//! and hand the other to the server. Readiness is reported without registering a waker;
//! an event loop tick always ends at its pulse deadline, so nothing is missed.

use crate::channel::Channel;
use crate::socket::{Listener, Socket};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::task::{Context, Poll};

#[derive(Debug, Default)]
struct SocketState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    eof: bool,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    write_blocked: bool,
    write_limit: Option<usize>,
}

/// A socket whose peer is the test
#[derive(Debug, Clone, Default)]
pub struct MockSocket {
    state: Rc<RefCell<SocketState>>,
}

impl MockSocket {
    /// Create a connected socket with nothing buffered
    pub fn new() -> MockSocket {
        MockSocket::default()
    }

    /// Bytes the server will read next
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.borrow_mut().inbound.extend(bytes);
    }

    /// Everything the server wrote since the last call
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().outbound)
    }

    /// Everything the server wrote since the last call, as lossy text
    pub fn take_text(&self) -> String {
        String::from_utf8_lossy(&self.take_output()).into_owned()
    }

    /// Reports end of stream once buffered input is consumed
    pub fn close_input(&self) {
        self.state.borrow_mut().eof = true;
    }

    /// Makes every read fail with `kind`
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().read_error = Some(kind);
    }

    /// Makes every write fail with `kind`
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().write_error = Some(kind);
    }

    /// While blocked, writes report `WouldBlock` and write readiness is pending
    pub fn set_write_blocked(&self, blocked: bool) {
        self.state.borrow_mut().write_blocked = blocked;
    }

    /// Caps the bytes accepted by each write
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state.borrow_mut().write_limit = limit;
    }
}

impl Socket for MockSocket {
    fn poll_read_ready(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let state = self.state.borrow();
        if !state.inbound.is_empty() || state.eof || state.read_error.is_some() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    fn poll_write_ready(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.state.borrow().write_blocked {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.read_error {
            return Err(kind.into());
        }
        if state.inbound.is_empty() {
            return if state.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let count = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.write_error {
            return Err(kind.into());
        }
        if state.write_blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let count = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.outbound.extend_from_slice(&buf[..count]);
        Ok(count)
    }
}

type PendingAccept = Result<(MockSocket, SocketAddr), io::ErrorKind>;

/// A listener fed by the test
#[derive(Debug, Clone)]
pub struct MockListener {
    pending: Rc<RefCell<VecDeque<PendingAccept>>>,
    local_addr: SocketAddr,
    next_port: Rc<RefCell<u16>>,
}

impl MockListener {
    /// Create a listener claiming to be bound to `127.0.0.1:5000`
    pub fn new() -> MockListener {
        MockListener {
            pending: Rc::default(),
            local_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            next_port: Rc::new(RefCell::new(40000)),
        }
    }

    /// Queues a new client and returns its side of the socket
    pub fn connect(&self) -> MockSocket {
        let socket = MockSocket::new();
        let port = {
            let mut next = self.next_port.borrow_mut();
            *next = next.wrapping_add(1);
            *next
        };
        self.pending
            .borrow_mut()
            .push_back(Ok((socket.clone(), SocketAddr::from(([127, 0, 0, 1], port)))));
        socket
    }

    /// Queues an accept failure
    pub fn fail_accept(&self, kind: io::ErrorKind) {
        self.pending.borrow_mut().push_back(Err(kind));
    }
}

impl Default for MockListener {
    fn default() -> Self {
        MockListener::new()
    }
}

impl Listener for MockListener {
    fn poll_accept(&self, _cx: &mut Context<'_>) -> Poll<io::Result<(Box<dyn Socket>, SocketAddr)>> {
        match self.pending.borrow_mut().pop_front() {
            Some(Ok((socket, addr))) => Poll::Ready(Ok((Box::new(socket), addr))),
            Some(Err(kind)) => Poll::Ready(Err(kind.into())),
            None => Poll::Pending,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    readable: bool,
    writable: bool,
    error: Option<io::ErrorKind>,
    close_count: u32,
}

/// A watched channel controlled by the test
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    state: Rc<RefCell<ChannelState>>,
}

impl MockChannel {
    /// Create a channel that is neither readable nor writable
    pub fn new() -> MockChannel {
        MockChannel::default()
    }

    /// Sets read readiness
    pub fn set_readable(&self, readable: bool) {
        self.state.borrow_mut().readable = readable;
    }

    /// Sets write readiness
    pub fn set_writable(&self, writable: bool) {
        self.state.borrow_mut().writable = writable;
    }

    /// Makes both readiness polls fail with `kind`
    pub fn fail(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().error = Some(kind);
    }

    /// Whether the registry closed the handle
    pub fn is_closed(&self) -> bool {
        self.state.borrow().close_count > 0
    }

    /// How many times the handle was closed
    pub fn close_count(&self) -> u32 {
        self.state.borrow().close_count
    }
}

impl Channel for MockChannel {
    fn poll_read_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let state = self.state.borrow();
        match (state.error, state.readable) {
            (Some(kind), _) => Poll::Ready(Err(kind.into())),
            (None, true) => Poll::Ready(Ok(())),
            (None, false) => Poll::Pending,
        }
    }

    fn poll_write_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let state = self.state.borrow();
        match (state.error, state.writable) {
            (Some(kind), _) => Poll::Ready(Err(kind.into())),
            (None, true) => Poll::Ready(Ok(())),
            (None, false) => Poll::Pending,
        }
    }

    fn close(&mut self) {
        self.state.borrow_mut().close_count += 1;
    }
}
