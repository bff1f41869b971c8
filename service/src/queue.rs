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


//! Bounded command queue

use std::collections::VecDeque;

/// FIFO of complete input lines with a fixed capacity
///
/// A full queue rejects new lines; queued lines are never overwritten.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    lines: VecDeque<String>,
    capacity: usize,
}

impl CommandQueue {
    /// Create a queue holding at most `capacity` lines
    pub fn new(capacity: usize) -> CommandQueue {
        CommandQueue {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues `line`, handing it back if the queue is full
    pub fn push_back(&mut self, line: String) -> Result<(), String> {
        if self.is_full() {
            return Err(line);
        }
        self.lines.push_back(line);
        Ok(())
    }

    /// Removes the oldest line
    pub fn pop_front(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether another line would be rejected
    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    /// Drops every queued line
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
