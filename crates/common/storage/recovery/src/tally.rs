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

//! Net message multiplicities derived from a sequence of records.
//!
//! `SET` adds one to `tally[queue][message]`, `GET` subtracts one, and `DEL`
//! clears everything known about the queue. Queues and messages are iterated
//! in the order they were first seen, so refilling from a tally is
//! deterministic. Non-positive counts are kept for arithmetic but never
//! yielded.

use std::collections::{BTreeMap, HashMap};

use crate::record::{Method, RecoveryRecord};

#[derive(Debug, Default, Clone)]
struct QueueTally {
    counts: HashMap<String, i64>,
    order:  Vec<String>,
}

impl QueueTally {
    fn add(&mut self, message: String, delta: i64) {
        if let Some(count) = self.counts.get_mut(&message) {
            *count += delta;
        } else {
            self.order.push(message.clone());
            self.counts.insert(message, delta);
        }
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.order.clear();
    }
}

#[derive(Debug, Default, Clone)]
pub struct Tally {
    queues: HashMap<String, QueueTally>,
    order:  Vec<String>,
}

impl Tally {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Fold one record into the tally.
    pub fn apply(&mut self, record: RecoveryRecord) {
        let RecoveryRecord {
            method,
            queue,
            message,
        } = record;

        if method == Method::Del {
            if let Some(tally) = self.queues.get_mut(&queue) {
                tally.clear();
            }
            return;
        }

        let delta = if method == Method::Set { 1 } else { -1 };
        self.queue_mut(queue).add(message, delta);
    }

    fn queue_mut(&mut self, queue: String) -> &mut QueueTally {
        if !self.queues.contains_key(&queue) {
            self.order.push(queue.clone());
        }
        self.queues.entry(queue).or_default()
    }

    /// Raw net count, which may be zero or negative.
    #[must_use]
    pub fn count(&self, queue: &str, message: &str) -> i64 {
        self.queues
            .get(queue)
            .and_then(|tally| tally.counts.get(message))
            .copied()
            .unwrap_or_default()
    }

    /// Every `(queue, message, count)` with a positive count, in first-seen
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> + '_ {
        self.order.iter().flat_map(move |queue| {
            let tally = &self.queues[queue];
            tally.order.iter().filter_map(move |message| {
                let count = tally.counts.get(message).copied().unwrap_or_default();
                u64::try_from(count)
                    .ok()
                    .filter(|count| *count > 0)
                    .map(|count| (queue.as_str(), message.as_str(), count))
            })
        })
    }

    /// Sum of all positive counts.
    #[must_use]
    pub fn total(&self) -> u64 { self.iter().map(|(_, _, count)| count).sum() }

    /// Whether replaying this tally would recreate nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.iter().next().is_none() }

    /// Positive counts keyed by `(queue, message)`, for order-independent
    /// comparison of two tallies.
    #[must_use]
    pub fn positive_counts(&self) -> BTreeMap<(String, String), u64> {
        self.iter()
            .map(|(queue, message, count)| ((queue.to_string(), message.to_string()), count))
            .collect()
    }
}

impl FromIterator<RecoveryRecord> for Tally {
    fn from_iter<I: IntoIterator<Item = RecoveryRecord>>(iter: I) -> Self {
        let mut tally = Self::new();
        for record in iter {
            tally.apply(record);
        }
        tally
    }
}
