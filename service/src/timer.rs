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


//! Script timers
//!
//! Timers live in a flat vector. Firing walks the entries present when the pass began,
//! by index, and never removes anything; timers added by a callback are appended and
//! first considered on the next tick. Dead timers are dropped by a separate
//! [`TimerQueue::remove_dead`] sweep.

use crate::error::{ScriptError, ServiceError};
use crate::host::{Host, ServerState};
use crate::types::{TimerId, seconds};
use metrics::counter;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, trace};

/// Callback run when a timer fires; `Ok(Some(d))` with `d > 0` reschedules it `d` seconds
/// after the tick that fired it
pub type TimerCallback = Box<dyn FnMut(&mut Host<'_>) -> Result<Option<f64>, ScriptError>>;

struct Timer {
    id: TimerId,
    fire_at: Instant,
    callback: Option<TimerCallback>,
    dead: bool,
}

/// All script timers
#[derive(Default)]
pub struct TimerQueue {
    timers: Vec<Timer>,
    next_id: u64,
}

impl TimerQueue {
    /// Create an empty queue
    pub fn new() -> TimerQueue {
        TimerQueue::default()
    }

    /// Adds a timer firing at `fire_at`
    pub fn add(&mut self, fire_at: Instant, callback: TimerCallback) -> TimerId {
        self.next_id += 1;
        let id = TimerId::new(self.next_id);
        self.timers.push(Timer {
            id,
            fire_at,
            callback: Some(callback),
            dead: false,
        });
        id
    }

    /// Marks a live timer dead
    pub fn cancel(&mut self, id: TimerId) -> Result<(), ServiceError> {
        let timer = self.live_mut(id)?;
        timer.dead = true;
        trace!(timer_id = %id, "timer cancelled");
        Ok(())
    }

    /// Time left before a live timer fires
    pub fn remaining(&self, id: TimerId, now: Instant) -> Result<Duration, ServiceError> {
        let timer = self
            .timers
            .iter()
            .find(|timer| timer.id == id)
            .ok_or(ServiceError::TimerNotFound(id))?;
        if timer.dead {
            return Err(ServiceError::TimerExpired(id));
        }
        Ok(timer.fire_at.saturating_duration_since(now))
    }

    /// Whether `id` names a timer that will still fire
    pub fn is_live(&self, id: TimerId) -> bool {
        self.timers.iter().any(|timer| timer.id == id && !timer.dead)
    }

    /// Drops dead timers, returning how many were removed
    pub fn remove_dead(&mut self) -> usize {
        let before = self.timers.len();
        self.timers.retain(|timer| !timer.dead);
        before - self.timers.len()
    }

    /// Number of timers, including dead ones not yet swept
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether there are no timers
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn live_mut(&mut self, id: TimerId) -> Result<&mut Timer, ServiceError> {
        let timer = self
            .timers
            .iter_mut()
            .find(|timer| timer.id == id)
            .ok_or(ServiceError::TimerNotFound(id))?;
        if timer.dead {
            return Err(ServiceError::TimerExpired(id));
        }
        Ok(timer)
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("timers", &self.timers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Fires every due timer once, rescheduling relative to `now`
pub(crate) fn fire_due(state: &mut ServerState, now: Instant) {
    let count = state.timers.timers.len();
    for index in 0..count {
        let timer = &mut state.timers.timers[index];
        if timer.dead || timer.fire_at > now {
            continue;
        }
        let Some(mut callback) = timer.callback.take() else {
            continue;
        };
        let id = timer.id;
        trace!(timer_id = %id, "timer firing");
        counter!("pulsemud.timers.fired").increment(1);

        let result = {
            let mut host = Host::new(state, now, None);
            callback(&mut host)
        };

        let timer = &mut state.timers.timers[index];
        match result {
            Ok(Some(secs)) if !timer.dead => {
                let Some(delay) = seconds(secs).filter(|delay| !delay.is_zero()) else {
                    timer.dead = true;
                    continue;
                };
                match now.checked_add(delay) {
                    Some(fire_at) => {
                        timer.fire_at = fire_at;
                        timer.callback = Some(callback);
                    }
                    None => {
                        error!(timer_id = %id, "timer reschedule of {secs} seconds is out of range");
                        timer.dead = true;
                    }
                }
            }
            Ok(_) => timer.dead = true,
            Err(err) => {
                error!(timer_id = %id, "timer callback failed: {err}");
                timer.dead = true;
            }
        }
    }
}
