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


//! Watched channels
//!
//! A channel is any external pollable handle a script wants readiness callbacks for, such
//! as a message-bus socket. The registry is polled in the same `poll_fn` as the
//! connections; only channels with at least one callback are polled.

use crate::error::{ScriptError, ServiceError};
use crate::host::{Host, ServerState};
use crate::types::ChannelId;
use std::collections::BTreeMap;
use std::io;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tracing::{debug, error};

/// An external handle with readiness notification
pub trait Channel {
    /// Registers interest in, or reports, read readiness
    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Registers interest in, or reports, write readiness
    fn poll_write_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Releases the handle
    fn close(&mut self);
}

/// Callback run when a channel becomes readable or writable
pub type ChannelCallback = Box<dyn FnMut(&mut Host<'_>, ChannelId) -> Result<(), ScriptError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Readable,
    Writable,
}

struct Slot {
    callback: Option<ChannelCallback>,
    generation: u64,
}

impl Slot {
    fn empty() -> Slot {
        Slot {
            callback: None,
            generation: 0,
        }
    }

    fn set(&mut self, callback: Option<ChannelCallback>) {
        self.callback = callback;
        self.generation += 1;
    }
}

struct Watched {
    channel: Box<dyn Channel>,
    readable: Slot,
    writable: Slot,
    closed: bool,
}

impl Watched {
    fn slot(&mut self, direction: Direction) -> &mut Slot {
        match direction {
            Direction::Readable => &mut self.readable,
            Direction::Writable => &mut self.writable,
        }
    }

    fn is_watched(&self) -> bool {
        self.readable.callback.is_some() || self.writable.callback.is_some()
    }

    fn force_close(&mut self) {
        if !self.closed {
            self.channel.close();
            self.closed = true;
        }
        self.readable.set(None);
        self.writable.set(None);
    }
}

/// Readiness reported for one channel during a poll
#[derive(Debug, Default)]
pub(crate) struct ChannelReadiness {
    pub(crate) id: Option<ChannelId>,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: Option<io::Error>,
}

/// Every watched channel, keyed by id
#[derive(Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<ChannelId, Watched>,
    next_id: u64,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> ChannelRegistry {
        ChannelRegistry::default()
    }

    /// Registers a handle with no callbacks
    pub fn watch(&mut self, channel: Box<dyn Channel>) -> ChannelId {
        self.next_id += 1;
        let id = ChannelId::new(self.next_id);
        self.channels.insert(
            id,
            Watched {
                channel,
                readable: Slot::empty(),
                writable: Slot::empty(),
                closed: false,
            },
        );
        debug!(channel_id = %id, "channel watched");
        id
    }

    /// Sets or clears the readable callback
    pub fn set_readable(
        &mut self,
        id: ChannelId,
        callback: Option<ChannelCallback>,
    ) -> Result<(), ServiceError> {
        self.entry(id)?.readable.set(callback);
        Ok(())
    }

    /// Sets or clears the writable callback
    pub fn set_writable(
        &mut self,
        id: ChannelId,
        callback: Option<ChannelCallback>,
    ) -> Result<(), ServiceError> {
        self.entry(id)?.writable.set(callback);
        Ok(())
    }

    /// Clears both callbacks
    pub fn unwatch(&mut self, id: ChannelId) -> Result<(), ServiceError> {
        let watched = self.entry(id)?;
        watched.readable.set(None);
        watched.writable.set(None);
        Ok(())
    }

    /// Whether the channel has at least one callback
    pub fn is_watched(&self, id: ChannelId) -> bool {
        self.channels.get(&id).is_some_and(Watched::is_watched)
    }

    /// Whether the channel is still registered
    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are registered
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Closes and drops channels with no callbacks
    pub fn remove_unwatched(&mut self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|id, watched| {
            if watched.is_watched() {
                return true;
            }
            if !watched.closed {
                watched.channel.close();
            }
            debug!(channel_id = %id, "channel unwatched");
            false
        });
        before - self.channels.len()
    }

    /// Polls every channel that has a callback for the matching direction
    pub(crate) fn poll_ready(&mut self, cx: &mut Context<'_>, ready: &mut Vec<ChannelReadiness>) {
        for (id, watched) in &mut self.channels {
            let mut readiness = ChannelReadiness {
                id: Some(*id),
                ..ChannelReadiness::default()
            };
            if watched.readable.callback.is_some() {
                match watched.channel.poll_read_ready(cx) {
                    Poll::Ready(Ok(())) => readiness.readable = true,
                    Poll::Ready(Err(err)) => readiness.error = Some(err),
                    Poll::Pending => {}
                }
            }
            if watched.writable.callback.is_some() && readiness.error.is_none() {
                match watched.channel.poll_write_ready(cx) {
                    Poll::Ready(Ok(())) => readiness.writable = true,
                    Poll::Ready(Err(err)) => readiness.error = Some(err),
                    Poll::Pending => {}
                }
            }
            if readiness.readable || readiness.writable || readiness.error.is_some() {
                ready.push(readiness);
            }
        }
    }

    fn entry(&mut self, id: ChannelId) -> Result<&mut Watched, ServiceError> {
        self.channels
            .get_mut(&id)
            .ok_or(ServiceError::ChannelNotFound(id))
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Runs the callbacks for one polled channel
pub(crate) fn dispatch(state: &mut ServerState, readiness: ChannelReadiness, now: Instant) {
    let Some(id) = readiness.id else {
        return;
    };
    if let Some(err) = readiness.error {
        error!(channel_id = %id, "channel in error state, closing: {err}");
        if let Some(watched) = state.channels.channels.get_mut(&id) {
            watched.force_close();
        }
        return;
    }
    if readiness.readable {
        invoke(state, id, Direction::Readable, now);
    }
    if readiness.writable {
        invoke(state, id, Direction::Writable, now);
    }
}

fn invoke(state: &mut ServerState, id: ChannelId, direction: Direction, now: Instant) {
    let Some(watched) = state.channels.channels.get_mut(&id) else {
        return;
    };
    let slot = watched.slot(direction);
    let Some(mut callback) = slot.callback.take() else {
        return;
    };
    let generation = slot.generation;

    let result = {
        let mut host = Host::new(state, now, None);
        callback(&mut host, id)
    };

    let Some(watched) = state.channels.channels.get_mut(&id) else {
        return;
    };
    match result {
        Ok(()) => {
            let slot = watched.slot(direction);
            if slot.generation == generation && slot.callback.is_none() {
                slot.callback = Some(callback);
            }
        }
        Err(err) => {
            error!(channel_id = %id, "channel callback failed: {err}");
            watched.force_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use std::cell::Cell;
    use std::rc::Rc;
    use tracing_test::traced_test;

    #[tokio::test(start_paused = true)]
    async fn test_callback_stays_installed() {
        let mut state = ServerState::default();
        let channel = MockChannel::new();
        let id = state.channels.watch(Box::new(channel.clone()));
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        state
            .channels
            .set_readable(
                id,
                Some(Box::new(move |_host, _id| {
                    counter.set(counter.get() + 1);
                    Ok(())
                })),
            )
            .unwrap();

        for _ in 0..2 {
            let readiness = ChannelReadiness {
                id: Some(id),
                readable: true,
                ..ChannelReadiness::default()
            };
            dispatch(&mut state, readiness, Instant::now());
        }
        assert_eq!(calls.get(), 2);
        assert!(state.channels.is_watched(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_clear_itself() {
        let mut state = ServerState::default();
        let channel = MockChannel::new();
        let id = state.channels.watch(Box::new(channel.clone()));
        state
            .channels
            .set_readable(
                id,
                Some(Box::new(|host, id| {
                    host.clear_readable(id)?;
                    Ok(())
                })),
            )
            .unwrap();

        let readiness = ChannelReadiness {
            id: Some(id),
            readable: true,
            ..ChannelReadiness::default()
        };
        dispatch(&mut state, readiness, Instant::now());
        assert!(!state.channels.is_watched(id));
        assert_eq!(state.channels.remove_unwatched(), 1);
        assert!(channel.is_closed());
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_callback_error_force_closes() {
        let mut state = ServerState::default();
        let channel = MockChannel::new();
        let id = state.channels.watch(Box::new(channel.clone()));
        state
            .channels
            .set_readable(id, Some(Box::new(|_host, _id| Err(ScriptError::failed("bus gone")))))
            .unwrap();
        state
            .channels
            .set_writable(id, Some(Box::new(|_host, _id| Ok(()))))
            .unwrap();

        let readiness = ChannelReadiness {
            id: Some(id),
            readable: true,
            writable: true,
            ..ChannelReadiness::default()
        };
        dispatch(&mut state, readiness, Instant::now());
        assert!(channel.is_closed());
        assert!(!state.channels.is_watched(id));
        assert!(logs_contain("channel callback failed: bus gone"));
        assert_eq!(state.channels.remove_unwatched(), 1);
        assert_eq!(channel.close_count(), 1);
    }

    #[test]
    fn test_unknown_channel() {
        let mut registry = ChannelRegistry::new();
        assert!(matches!(
            registry.unwatch(ChannelId::new(1)),
            Err(ServiceError::ChannelNotFound(_))
        ));
    }
}
