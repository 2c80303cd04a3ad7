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

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use lmq_common_storage_recovery::Tally;
use tracing::{info, warn};

use crate::buffer::GrowableQueue;

/// Outcome of refilling the registry from a replayed tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreStats {
    pub queues:   usize,
    pub messages: u64,
    /// Messages that did not fit because growth is disabled.
    pub dropped:  u64,
}

/// Queues by name, created on first use.
#[derive(Debug)]
pub struct QueueRegistry {
    queues:           DashMap<String, Arc<GrowableQueue>>,
    initial_capacity: usize,
    growth:           usize,
}

impl QueueRegistry {
    #[must_use]
    pub fn new(initial_capacity: usize, growth: usize) -> Self {
        Self {
            queues: DashMap::new(),
            initial_capacity,
            growth,
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<GrowableQueue> {
        if let Some(queue) = self.queues.get(name) {
            return queue.clone();
        }
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(queue = name, capacity = self.initial_capacity, "Queue created");
                Arc::new(GrowableQueue::new(self.initial_capacity, self.growth))
            })
            .clone()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<GrowableQueue>> {
        self.queues.get(name).map(|queue| queue.clone())
    }

    /// Run `f` on a queue, creating it first if needed.
    ///
    /// The queue cannot be removed while `f` runs, so whatever `f` logs is
    /// ordered before a concurrent [`remove_with`](Self::remove_with) of the
    /// same queue.
    pub fn with_or_create<R>(&self, name: &str, f: impl FnOnce(&GrowableQueue) -> R) -> R {
        if let Some(queue) = self.queues.get(name) {
            return f(&queue);
        }
        let queue = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(queue = name, capacity = self.initial_capacity, "Queue created");
                Arc::new(GrowableQueue::new(self.initial_capacity, self.growth))
            })
            .downgrade();
        f(&queue)
    }

    /// Run `f` on an existing queue. The queue cannot be removed while `f`
    /// runs.
    pub fn with_queue<R>(&self, name: &str, f: impl FnOnce(&GrowableQueue) -> R) -> Option<R> {
        self.queues.get(name).map(|queue| f(&queue))
    }

    /// Run `f` on a queue with exclusive access, then drop the queue and
    /// everything in it. `None` if there is no such queue.
    pub fn remove_with<R>(&self, name: &str, f: impl FnOnce(&GrowableQueue) -> R) -> Option<R> {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                let result = f(entry.get());
                entry.remove();
                Some(result)
            }
            Entry::Vacant(_) => None,
        }
    }

    #[must_use]
    pub fn count(&self, name: &str) -> Option<usize> { self.queues.get(name).map(|queue| queue.len()) }

    /// Queue names in lexical order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize { self.queues.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.queues.is_empty() }

    /// Push every positive tally entry `count` times, in first-seen order.
    pub fn restore(&self, tally: &Tally) -> RestoreStats {
        let mut stats = RestoreStats::default();
        let mut last_queue: Option<&str> = None;

        for (name, message, count) in tally.iter() {
            let queue = self.get_or_create(name);
            if last_queue != Some(name) {
                stats.queues += 1;
                last_queue = Some(name);
            }

            for _ in 0..count {
                if queue.push(message.to_string()).is_ok() {
                    stats.messages += 1;
                } else {
                    stats.dropped += 1;
                }
            }
        }

        if stats.dropped > 0 {
            warn!(
                dropped = stats.dropped,
                "Replayed messages did not fit into fixed-capacity queues"
            );
        }
        info!(
            queues = stats.queues,
            messages = stats.messages,
            "Queues restored from recovery log"
        );
        stats
    }
}
