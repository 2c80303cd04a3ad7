// Copyright 2025 Crrow
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

//! Fixed-allocation FIFO buffer that grows by a constant step.
//!
//! Pushes and pops go straight to a lock-free [`ArrayQueue`] under a shared
//! lock. When a push finds the buffer full, the pusher takes the exclusive
//! lock, allocates a buffer `growth` slots larger, drains the old buffer into
//! it in order and swaps it in. Nothing can pop or push during the drain, so
//! FIFO order survives every growth event.
//!
//! ```text
//!  capacity 3, growth 2
//!  [a b c]        push(d) finds no spare slot
//!  [a b c _ _]    drain into a buffer of 3 + 2
//!  [a b c d _]    push(d) retried
//! ```

use crossbeam::queue::ArrayQueue;
use parking_lot::RwLock;
use tracing::debug;

pub struct GrowableQueue {
    buffer: RwLock<ArrayQueue<String>>,
    growth: usize,
}

impl GrowableQueue {
    /// Create a queue holding `initial_capacity` messages (at least one)
    /// that grows by `growth` slots whenever it fills up. A `growth` of zero
    /// makes the capacity fixed.
    #[must_use]
    pub fn new(initial_capacity: usize, growth: usize) -> Self {
        Self {
            buffer: RwLock::new(ArrayQueue::new(initial_capacity.max(1))),
            growth,
        }
    }

    /// Append a message, growing the buffer first if it is full.
    ///
    /// # Errors
    ///
    /// Hands the message back if the buffer is full and growth is disabled.
    pub fn push(&self, message: String) -> Result<(), String> {
        let Err(message) = self.buffer.read().push(message) else {
            return Ok(());
        };
        if self.growth == 0 {
            return Err(message);
        }

        let mut buffer = self.buffer.write();
        if buffer.is_full() {
            let grown = ArrayQueue::new(buffer.capacity().saturating_add(self.growth));
            while let Some(old) = buffer.pop() {
                let overflow = grown.push(old);
                debug_assert!(overflow.is_ok());
            }
            debug!(
                from = buffer.capacity(),
                to = grown.capacity(),
                len = grown.len(),
                "Queue buffer grown"
            );
            *buffer = grown;
        }
        buffer.push(message)
    }

    /// Remove the oldest message without waiting.
    pub fn pop(&self) -> Option<String> { self.buffer.read().pop() }

    #[must_use]
    pub fn len(&self) -> usize { self.buffer.read().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.buffer.read().is_empty() }

    #[must_use]
    pub fn capacity(&self) -> usize { self.buffer.read().capacity() }

    #[must_use]
    pub const fn growth(&self) -> usize { self.growth }
}

impl std::fmt::Debug for GrowableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.buffer.read();
        f.debug_struct("GrowableQueue")
            .field("len", &buffer.len())
            .field("capacity", &buffer.capacity())
            .field("growth", &self.growth)
            .finish()
    }
}
