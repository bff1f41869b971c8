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


//! The host API seen by scripts
//!
//! Every script entry point receives a [`Host`]: continuations, close hooks, timer and
//! channel callbacks, and prompt callbacks. A `Host` borrows the whole [`ServerState`]
//! for the duration of one call, so script code can reach any connection but can never
//! hold on to one across a yield.

use crate::channel::{Channel, ChannelCallback, ChannelRegistry};
use crate::config::LogLevel;
use crate::connection::Connection;
use crate::error::{ScriptError, ServiceError};
use crate::extra::{ExtraData, Prompt};
use crate::script::{Outcome, Value};
use crate::table::ConnectionTable;
use crate::timer::{TimerCallback, TimerQueue};
use crate::types::{ChannelId, ConnectionId, ConnectionState, TimerId, seconds};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Everything the event loop owns apart from the listener and the script
#[derive(Debug, Default)]
pub struct ServerState {
    pub(crate) connections: ConnectionTable,
    pub(crate) timers: TimerQueue,
    pub(crate) channels: ChannelRegistry,
    pub(crate) shutdown: bool,
    pub(crate) args: Vec<String>,
}

impl ServerState {
    /// Create an empty state with the given script arguments
    pub fn new(args: Vec<String>) -> ServerState {
        ServerState {
            args,
            ..ServerState::default()
        }
    }

    /// The connection table
    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// The connection table, mutably
    pub fn connections_mut(&mut self) -> &mut ConnectionTable {
        &mut self.connections
    }

    /// Script timers
    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    /// Watched channels
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Whether a script requested shutdown
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }
}

/// A script's handle on the server for the duration of one call
pub struct Host<'a> {
    state: &'a mut ServerState,
    now: Instant,
    current: Option<ConnectionId>,
}

impl<'a> Host<'a> {
    /// Borrow `state` on behalf of `current`, the connection whose continuation is running
    pub fn new(state: &'a mut ServerState, now: Instant, current: Option<ConnectionId>) -> Host<'a> {
        Host {
            state,
            now,
            current,
        }
    }

    /// The connection whose continuation is running, if any
    pub fn current(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Start of the current tick
    pub fn now(&self) -> Instant {
        self.now
    }

    /// The underlying state
    pub fn state(&self) -> &ServerState {
        self.state
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Sends text to a connection
    ///
    /// Text sent to a connection that is already closed is dropped.
    pub fn send(&mut self, id: ConnectionId, text: &str) -> Result<(), ServiceError> {
        self.connection_mut(id)?.append(text);
        Ok(())
    }

    /// Drains a connection: pending output is flushed, then it closes
    pub fn close(&mut self, id: ConnectionId) -> Result<(), ServiceError> {
        self.connection_mut(id)?.drain();
        Ok(())
    }

    /// Postpones a connection without resuming its continuation afterwards
    pub fn delay(&mut self, id: ConnectionId, secs: f64) -> Result<(), ServiceError> {
        let now = self.now;
        self.connection_mut(id)?.delay(secs, now, false);
        Ok(())
    }

    /// Offers or withdraws server-side echo
    pub fn will_echo(&mut self, id: ConnectionId, enable: bool) -> Result<(), ServiceError> {
        self.connection_mut(id)?.will_echo(enable);
        Ok(())
    }

    /// Whether the client agreed to server-side echo
    pub fn echo_enabled(&self, id: ConnectionId) -> Result<bool, ServiceError> {
        Ok(self.connection(id)?.echo_enabled())
    }

    /// A connection's extra data
    pub fn extra(&self, id: ConnectionId) -> Result<&ExtraData, ServiceError> {
        Ok(self.connection(id)?.extra())
    }

    /// A connection's extra data, mutably
    pub fn extra_mut(&mut self, id: ConnectionId) -> Result<&mut ExtraData, ServiceError> {
        Ok(self.connection_mut(id)?.extra_mut())
    }

    /// Replaces a connection's prompt
    pub fn set_prompt(
        &mut self,
        id: ConnectionId,
        prompt: impl Into<Prompt>,
    ) -> Result<(), ServiceError> {
        self.connection_mut(id)?.extra_mut().set_prompt(prompt);
        Ok(())
    }

    /// Ids of every connection that is not closed
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.state
            .connections
            .iter()
            .filter(|connection| !connection.is_closed())
            .map(Connection::id)
            .collect()
    }

    /// A connection's state
    pub fn connection_state(&self, id: ConnectionId) -> Result<ConnectionState, ServiceError> {
        Ok(self.connection(id)?.state())
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Builds the outcome that waits for the next input line of `id`
    ///
    /// Only the running continuation may read, and only from its own connection.
    pub fn read(&self, id: ConnectionId) -> Result<Outcome, ScriptError> {
        self.check_reader(id)?;
        Ok(Outcome::Yielded(Vec::new()))
    }

    /// Builds the outcome that sleeps `secs` and then resumes with no arguments
    pub fn read_with_delay(&self, id: ConnectionId, secs: f64) -> Result<Outcome, ScriptError> {
        self.check_reader(id)?;
        Ok(Outcome::Yielded(vec![Value::Number(secs)]))
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Runs `callback` after `secs`; returning `Ok(Some(d))` with `d > 0` repeats it
    pub fn add_timer<F>(&mut self, secs: f64, callback: F) -> Result<TimerId, ServiceError>
    where
        F: FnMut(&mut Host<'_>) -> Result<Option<f64>, ScriptError> + 'static,
    {
        let fire_at = seconds(secs)
            .and_then(|delay| self.now.checked_add(delay))
            .ok_or_else(|| ServiceError::Other(format!("invalid timer delay {secs}")))?;
        let callback: TimerCallback = Box::new(callback);
        let id = self.state.timers.add(fire_at, callback);
        debug!(timer_id = %id, "timer added for {secs} seconds");
        Ok(id)
    }

    /// Cancels a live timer
    pub fn cancel_timer(&mut self, id: TimerId) -> Result<(), ServiceError> {
        self.state.timers.cancel(id)
    }

    /// Seconds until a live timer fires
    pub fn timer_remaining(&self, id: TimerId) -> Result<f64, ServiceError> {
        self.state
            .timers
            .remaining(id, self.now)
            .map(|remaining| remaining.as_secs_f64())
    }

    // ========================================================================
    // Channels
    // ========================================================================

    /// Registers an external handle; it is polled once a callback is set
    pub fn watch(&mut self, channel: Box<dyn Channel>) -> ChannelId {
        self.state.channels.watch(channel)
    }

    /// Sets the callback run when the channel is readable
    pub fn set_readable<F>(&mut self, id: ChannelId, callback: F) -> Result<(), ServiceError>
    where
        F: FnMut(&mut Host<'_>, ChannelId) -> Result<(), ScriptError> + 'static,
    {
        let callback: ChannelCallback = Box::new(callback);
        self.state.channels.set_readable(id, Some(callback))
    }

    /// Clears the readable callback
    pub fn clear_readable(&mut self, id: ChannelId) -> Result<(), ServiceError> {
        self.state.channels.set_readable(id, None)
    }

    /// Sets the callback run when the channel is writable
    pub fn set_writable<F>(&mut self, id: ChannelId, callback: F) -> Result<(), ServiceError>
    where
        F: FnMut(&mut Host<'_>, ChannelId) -> Result<(), ScriptError> + 'static,
    {
        let callback: ChannelCallback = Box::new(callback);
        self.state.channels.set_writable(id, Some(callback))
    }

    /// Clears the writable callback
    pub fn clear_writable(&mut self, id: ChannelId) -> Result<(), ServiceError> {
        self.state.channels.set_writable(id, None)
    }

    /// Clears both callbacks; the channel is closed and dropped on the next sweep
    pub fn unwatch(&mut self, id: ChannelId) -> Result<(), ServiceError> {
        self.state.channels.unwatch(id)
    }

    // ========================================================================
    // Process
    // ========================================================================

    /// Emits a log event on behalf of the script
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => trace!(target: "pulsemud::script", "{message}"),
            LogLevel::Debug => debug!(target: "pulsemud::script", "{message}"),
            LogLevel::Info => info!(target: "pulsemud::script", "{message}"),
            LogLevel::Warn => warn!(target: "pulsemud::script", "{message}"),
            LogLevel::Error => error!(target: "pulsemud::script", "{message}"),
        }
    }

    /// Stops the event loop after the current tick
    pub fn shutdown(&mut self) {
        info!("shutdown requested by script");
        self.state.shutdown = true;
    }

    /// Arguments passed through to the script
    pub fn args(&self) -> &[String] {
        &self.state.args
    }

    fn connection(&self, id: ConnectionId) -> Result<&Connection, ServiceError> {
        self.state
            .connections
            .get(id)
            .ok_or(ServiceError::ConnectionNotFound(id))
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection, ServiceError> {
        self.state
            .connections
            .get_mut(id)
            .ok_or(ServiceError::ConnectionNotFound(id))
    }

    fn check_reader(&self, id: ConnectionId) -> Result<(), ScriptError> {
        if self.current == Some(id) {
            Ok(())
        } else {
            Err(ScriptError::ForeignRead {
                requester: self.current,
                target: id,
            })
        }
    }
}

impl std::fmt::Debug for Host<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("now", &self.now)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
