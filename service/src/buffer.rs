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


//! Fixed-capacity byte buffer
//!
//! [`Buffer`] backs both the inbound line assembler and the outbound write queue. Its
//! capacity is fixed at construction and never grows: callers learn from the return value
//! of [`Buffer::append`] how much was accepted and decide what to do with the rest.

use tracing::error;

/// A byte buffer that never grows past the size it was created with
#[derive(Clone)]
pub struct Buffer {
    data: Box<[u8]>,
    used: usize,
}

impl Buffer {
    /// Create an empty buffer holding at most `size` bytes
    pub fn new(size: usize) -> Buffer {
        Buffer {
            data: vec![0u8; size].into_boxed_slice(),
            used: 0,
        }
    }

    /// Copies as many leading bytes of `bytes` as fit and returns how many were copied
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.available());
        self.data[self.used..self.used + count].copy_from_slice(&bytes[..count]);
        self.used += count;
        count
    }

    /// Appends one byte, returning `false` if the buffer is full
    pub fn append_byte(&mut self, byte: u8) -> bool {
        if self.available() == 0 {
            return false;
        }
        self.data[self.used] = byte;
        self.used += 1;
        true
    }

    /// Removes the last byte, if any
    pub fn backspace(&mut self) {
        self.used = self.used.saturating_sub(1);
    }

    /// Removes the first `count` bytes, shifting the remainder to the front
    pub fn drain(&mut self, count: usize) {
        if count > self.used {
            error!(
                "draining more than currently in buffer ({count} > {})",
                self.used
            );
            self.used = 0;
            return;
        }
        self.data.copy_within(count..self.used, 0);
        self.used -= count;
    }

    /// Empties the buffer
    pub fn clear(&mut self) {
        self.used = 0;
    }

    /// The buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Number of buffered bytes
    pub fn used(&self) -> usize {
        self.used
    }

    /// Fixed capacity
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Remaining capacity
    pub fn available(&self) -> usize {
        self.data.len() - self.used
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("used", &self.used)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[test]
    fn test_append_is_bounded() {
        let mut buffer = Buffer::new(4);
        assert_eq!(buffer.append(b"abcdef"), 4);
        assert_eq!(buffer.as_slice(), b"abcd");
        assert_eq!(buffer.available(), 0);
        assert!(!buffer.append_byte(b'x'));
        assert_eq!(buffer.append(b"z"), 0);
    }

    #[test]
    fn test_backspace() {
        let mut buffer = Buffer::new(8);
        buffer.append(b"ab");
        buffer.backspace();
        assert_eq!(buffer.as_slice(), b"a");
        buffer.backspace();
        buffer.backspace();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_shifts_remainder() {
        let mut buffer = Buffer::new(8);
        buffer.append(b"hello");
        buffer.drain(2);
        assert_eq!(buffer.as_slice(), b"llo");
        assert_eq!(buffer.available(), 5);
        buffer.drain(3);
        assert!(buffer.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_over_drain_empties_and_logs() {
        let mut buffer = Buffer::new(8);
        buffer.append(b"abc");
        buffer.drain(10);
        assert!(buffer.is_empty());
        assert!(logs_contain("draining more than currently in buffer"));
    }

    proptest! {
        #[test]
        fn prop_used_never_exceeds_size(
            size in 1usize..64,
            ops in proptest::collection::vec((0u8..4, proptest::collection::vec(any::<u8>(), 0..80)), 0..40),
        ) {
            let mut buffer = Buffer::new(size);
            let mut model: Vec<u8> = Vec::new();
            for (op, bytes) in ops {
                match op {
                    0 => {
                        let copied = buffer.append(&bytes);
                        let expected = bytes.len().min(size - model.len());
                        prop_assert_eq!(copied, expected);
                        model.extend_from_slice(&bytes[..copied]);
                    }
                    1 => {
                        let byte = bytes.first().copied().unwrap_or(0);
                        if buffer.append_byte(byte) {
                            model.push(byte);
                        }
                    }
                    2 => {
                        buffer.backspace();
                        model.pop();
                    }
                    _ => {
                        let count = bytes.len().min(model.len());
                        buffer.drain(count);
                        model.drain(..count);
                    }
                }
                prop_assert!(buffer.used() <= buffer.size());
                prop_assert_eq!(buffer.as_slice(), &model[..]);
            }
        }
    }
}
