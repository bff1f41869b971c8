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


//! A single client connection
//!
//! `Connection` owns the socket, the Telnet codec, both bounded buffers and the command
//! queue. It turns readable bytes into queued command lines and script output into
//! encoded bytes, closing itself on any fault it cannot recover from. It never awaits:
//! the event loop calls [`Connection::receive`] and [`Connection::flush`] only after the
//! socket polled ready.

use crate::buffer::Buffer;
use crate::config::ConnectionLimits;
use crate::extra::ExtraData;
use crate::queue::CommandQueue;
use crate::script::Continuation;
use crate::socket::Socket;
use crate::types::{ConnectionId, ConnectionState, seconds};
use bytes::Bytes;
use metrics::counter;
use pulsemud_telnetcodec::naws::WindowSize;
use pulsemud_telnetcodec::{CodecResult, TelnetCodec, TelnetEvent, TelnetOption, TelnetSide};
use std::io;
use std::net::SocketAddr;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Sent once when an input line overflows the line buffer
pub const LINE_TOO_LONG: &str = "Input line too long. Command truncated.\r\n";

/// Sent when a complete line arrives while the command queue is full
pub const QUEUE_FULL: &str = "Command queue full. Command discarded.\r\n";

/// A client connection and its protocol state
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    socket: Option<Box<dyn Socket>>,
    state: ConnectionState,
    codec: TelnetCodec,
    line: Buffer,
    output: Buffer,
    recv_chunk: usize,
    commands: CommandQueue,
    continuation: Option<Box<dyn Continuation>>,
    pending_resume_at: Option<Instant>,
    self_delayed: bool,
    needs_prompt: bool,
    needs_newline: bool,
    skip_until_newline: bool,
    close_hook_pending: bool,
    extra: ExtraData,
    bytes_received: u64,
    bytes_sent: u64,
}

impl Connection {
    /// Wrap an accepted socket
    pub fn new(
        id: ConnectionId,
        socket: Box<dyn Socket>,
        peer_addr: SocketAddr,
        limits: &ConnectionLimits,
    ) -> Connection {
        Connection {
            id,
            peer_addr,
            socket: Some(socket),
            state: ConnectionState::Open,
            codec: TelnetCodec::new(),
            line: Buffer::new(limits.line_buffer),
            output: Buffer::new(limits.output_buffer),
            recv_chunk: limits.recv_chunk,
            commands: CommandQueue::new(limits.command_queue),
            continuation: None,
            pending_resume_at: None,
            self_delayed: false,
            needs_prompt: false,
            needs_newline: false,
            skip_until_newline: false,
            close_hook_pending: false,
            extra: ExtraData::new(),
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Queues the opening negotiation: `WILL COMPRESS2` and `DO NAWS`
    pub fn begin_negotiation(&mut self) {
        let compress = self
            .codec
            .negotiate(TelnetSide::Local, TelnetOption::Compress2, true);
        self.write_optional(compress);
        let naws = self
            .codec
            .negotiate(TelnetSide::Remote, TelnetOption::NAWS, true);
        self.write_optional(naws);
        self.needs_prompt = true;
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection has reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Script-visible data
    pub fn extra(&self) -> &ExtraData {
        &self.extra
    }

    /// Script-visible data
    pub fn extra_mut(&mut self) -> &mut ExtraData {
        &mut self.extra
    }

    /// Queued command lines
    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    /// Bytes waiting in the outbound buffer
    pub fn pending_output(&self) -> usize {
        self.output.used()
    }

    /// When a delayed connection becomes runnable again
    pub fn pending_resume_at(&self) -> Option<Instant> {
        self.pending_resume_at
    }

    /// Whether a prompt is owed
    pub fn needs_prompt(&self) -> bool {
        self.needs_prompt
    }

    /// Whether the client has agreed to let the server echo
    pub fn echo_enabled(&self) -> bool {
        self.codec.is_enabled(TelnetOption::Echo, TelnetSide::Local)
    }

    /// Whether outbound bytes are compressed
    pub fn is_compressing(&self) -> bool {
        self.codec.is_compressing()
    }

    /// Total bytes read from the socket
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Total bytes written to the socket
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub(crate) fn socket(&self) -> Option<&dyn Socket> {
        self.socket.as_deref()
    }

    /// Read interest: only open connections read
    pub fn should_recv(&self) -> bool {
        self.state == ConnectionState::Open && self.socket.is_some()
    }

    /// Write interest: anything not closed with buffered output
    pub fn should_send(&self) -> bool {
        self.state != ConnectionState::Closed && !self.output.is_empty()
    }

    /// Reads one chunk and processes the decoded events
    pub fn receive(&mut self) {
        let mut scratch = vec![0u8; self.recv_chunk];
        let result = loop {
            let Some(socket) = self.socket.as_ref() else {
                return;
            };
            match socket.try_read(&mut scratch) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                result => break result,
            }
        };

        match result {
            Ok(0) => {
                info!(connection_id = %self.id, "connection closed by peer");
                self.close();
            }
            Ok(count) => {
                self.bytes_received += count as u64;
                trace!(connection_id = %self.id, "received {count} bytes");
                let events = self.codec.feed(&scratch[..count]);
                self.handle_events(events);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                warn!(connection_id = %self.id, "read failed: {err}");
                self.close();
            }
        }
    }

    /// Writes as much buffered output as the socket accepts
    pub fn flush(&mut self) {
        while !self.output.is_empty() {
            let result = match self.socket.as_ref() {
                Some(socket) => socket.try_write(self.output.as_slice()),
                None => return,
            };
            match result {
                Ok(0) => return,
                Ok(count) => {
                    self.bytes_sent += count as u64;
                    self.output.drain(count);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    debug!(connection_id = %self.id, "write would block");
                    return;
                }
                Err(err) => {
                    warn!(connection_id = %self.id, "write failed: {err}");
                    self.close();
                    return;
                }
            }
        }
    }

    /// Queues encoded bytes, closing the connection if they cannot be absorbed
    pub fn buffer_output(&mut self, bytes: &[u8]) {
        if self.is_closed() {
            return;
        }
        let copied = self.output.append(bytes);
        if copied == bytes.len() {
            return;
        }
        self.flush();
        if self.is_closed() {
            return;
        }
        let rest = &bytes[copied..];
        if self.output.append(rest) < rest.len() {
            warn!(connection_id = %self.id, "flooded out");
            counter!("pulsemud.connections.flooded").increment(1);
            self.close();
        }
    }

    /// Sends script text, preceded by a newline if a prompt is on the line
    pub fn append(&mut self, text: &str) {
        if self.is_closed() {
            return;
        }
        if self.needs_newline {
            let newline = self.codec.send(b"\r\n");
            self.write(newline);
        }
        let encoded = self.codec.send(text.as_bytes());
        self.write(encoded);
        self.needs_newline = false;
        self.needs_prompt = true;
    }

    /// Sends a prompt followed by `IAC GA`
    pub fn send_prompt(&mut self, prompt: &str) {
        let encoded = self.codec.send(prompt.as_bytes());
        self.write(encoded);
        self.needs_prompt = false;
        self.needs_newline = true;
        let go_ahead = self.codec.go_ahead();
        self.write(go_ahead);
    }

    /// Offers or withdraws server-side echo
    pub fn will_echo(&mut self, enable: bool) {
        let frame = self.codec.will_echo(enable);
        self.write_optional(frame);
    }

    /// Postpones the continuation by `secs`
    ///
    /// Delays accumulate while the connection is already delaying.
    pub fn delay(&mut self, secs: f64, now: Instant, self_delayed: bool) {
        let Some(duration) = seconds(secs) else {
            warn!(connection_id = %self.id, "ignoring invalid delay of {secs} seconds");
            return;
        };
        match (self.state, self.pending_resume_at) {
            (ConnectionState::Open, _) => {
                self.pending_resume_at = now.checked_add(duration);
                self.state = ConnectionState::Delaying;
                self.self_delayed = self_delayed;
            }
            (ConnectionState::Delaying, Some(at)) => {
                self.pending_resume_at = at.checked_add(duration);
                self.self_delayed |= self_delayed;
            }
            (state, _) => {
                debug!(connection_id = %self.id, "ignoring delay while {state}");
                return;
            }
        }
        if self.pending_resume_at.is_none() {
            warn!(connection_id = %self.id, "delay of {secs} seconds is out of range, draining");
            self.drain();
        }
    }

    /// Reopens a delayed connection whose deadline has passed
    ///
    /// Returns `true` when the continuation asked for the delay and must be resumed.
    pub fn wake(&mut self, now: Instant) -> bool {
        match (self.state, self.pending_resume_at) {
            (ConnectionState::Delaying, Some(at)) if now >= at => {
                self.state = ConnectionState::Open;
                self.pending_resume_at = None;
                std::mem::take(&mut self.self_delayed)
            }
            _ => false,
        }
    }

    /// Stops reading and closes once output is flushed
    pub fn drain(&mut self) {
        if self.state.is_active() {
            debug!(connection_id = %self.id, "draining");
            self.state = ConnectionState::Draining;
            self.pending_resume_at = None;
            self.self_delayed = false;
        }
    }

    /// Releases the socket immediately
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        debug!(connection_id = %self.id, "closed");
        self.state = ConnectionState::Closed;
        self.socket = None;
        self.pending_resume_at = None;
        self.close_hook_pending = true;
        self.commands.clear();
    }

    /// Closes a draining connection whose output has been flushed
    pub(crate) fn finish_drain(&mut self) {
        if self.state == ConnectionState::Draining && self.output.is_empty() {
            self.close();
        }
    }

    pub(crate) fn take_close_hook(&mut self) -> bool {
        std::mem::take(&mut self.close_hook_pending)
    }

    pub(crate) fn close_hook_pending(&self) -> bool {
        self.close_hook_pending
    }

    pub(crate) fn take_continuation(&mut self) -> Option<Box<dyn Continuation>> {
        self.continuation.take()
    }

    pub(crate) fn set_continuation(&mut self, continuation: Box<dyn Continuation>) {
        self.continuation = Some(continuation);
    }

    pub(crate) fn pop_command(&mut self) -> Option<String> {
        self.commands.pop_front()
    }

    fn handle_events(&mut self, events: Vec<TelnetEvent>) {
        // Replies were encoded during `feed`, so they go out ahead of anything the
        // remaining events write.
        let (replies, events): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|event| matches!(event, TelnetEvent::Send(_)));
        for reply in replies {
            if let TelnetEvent::Send(bytes) = reply {
                self.buffer_output(&bytes);
            }
        }

        for event in events {
            if self.is_closed() {
                return;
            }
            match event {
                TelnetEvent::Data(data) => self.handle_data(&data),
                TelnetEvent::Send(bytes) => self.buffer_output(&bytes),
                TelnetEvent::OptionGranted(TelnetOption::Compress2, TelnetSide::Local) => {
                    debug!(connection_id = %self.id, "MCCP2 compression started");
                    counter!("pulsemud.connections.compressed").increment(1);
                }
                TelnetEvent::OptionGranted(option, side) => {
                    debug!(connection_id = %self.id, "{option} enabled on {side} side");
                }
                TelnetEvent::OptionDenied(TelnetOption::NAWS, TelnetSide::Remote) => {
                    debug!(connection_id = %self.id, "window size reporting declined");
                    self.extra.clear_window_size();
                }
                TelnetEvent::OptionDenied(option, side) => {
                    debug!(connection_id = %self.id, "{option} disabled on {side} side");
                }
                TelnetEvent::Subnegotiation(TelnetOption::NAWS, payload) => {
                    match WindowSize::decode(&payload) {
                        Ok(size) => {
                            debug!(connection_id = %self.id, "window size {size}");
                            self.extra.set_window_size(size.cols, size.rows);
                        }
                        Err(err) => {
                            warn!(connection_id = %self.id, "{err}");
                            self.disable_naws();
                        }
                    }
                }
                TelnetEvent::Subnegotiation(option, payload) => {
                    debug!(connection_id = %self.id, "ignoring {} byte {option} subnegotiation", payload.len());
                }
                TelnetEvent::Command(command) => {
                    trace!(connection_id = %self.id, "command {command:#04X}");
                }
                TelnetEvent::Warning(text) => {
                    warn!(connection_id = %self.id, "protocol warning: {text}");
                }
                TelnetEvent::Error(text) => {
                    warn!(connection_id = %self.id, "protocol error: {text}");
                    self.close();
                }
            }
        }
    }

    fn handle_data(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'\r' => {}
                b'\n' => {
                    self.needs_newline = false;
                    self.skip_until_newline = false;
                    self.accept_command();
                }
                _ if self.skip_until_newline => {}
                0x08 => self.line.backspace(),
                _ => {
                    if !self.line.append_byte(byte) {
                        self.append(LINE_TOO_LONG);
                        self.skip_until_newline = true;
                    }
                }
            }
        }
    }

    fn accept_command(&mut self) {
        let line = String::from_utf8_lossy(self.line.as_slice()).into_owned();
        self.line.clear();
        if let Err(line) = self.commands.push_back(line) {
            warn!(connection_id = %self.id, "command queue full, discarding {} bytes", line.len());
            self.append(QUEUE_FULL);
        }
    }

    fn disable_naws(&mut self) {
        let frame = self
            .codec
            .negotiate(TelnetSide::Remote, TelnetOption::NAWS, false);
        self.write_optional(frame);
        self.extra.clear_window_size();
    }

    fn write(&mut self, encoded: CodecResult<Bytes>) {
        match encoded {
            Ok(bytes) => self.buffer_output(&bytes),
            Err(err) => {
                warn!(connection_id = %self.id, "encoding failed: {err}");
                self.close();
            }
        }
    }

    fn write_optional(&mut self, encoded: CodecResult<Option<Bytes>>) {
        match encoded {
            Ok(Some(bytes)) => self.buffer_output(&bytes),
            Ok(None) => {}
            Err(err) => {
                warn!(connection_id = %self.id, "encoding failed: {err}");
                self.close();
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .field("output", &self.output)
            .field("commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}
