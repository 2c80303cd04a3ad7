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

use std::{path::PathBuf, time::Duration};

/// Default number of records per segment before the writer rotates.
pub const DEFAULT_SEGMENT_RECORDS: u64 = 1_000_000;

/// Default number of records that may wait for the writer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub dir:              PathBuf,
    pub roll_strategy:    RollStrategy,
    pub flush_mode:       FlushMode,
    pub channel_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            dir:              PathBuf::from("./recovery"),
            roll_strategy:    RollStrategy::ByCount(DEFAULT_SEGMENT_RECORDS),
            flush_mode:       FlushMode::Async,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// When the writer closes the current segment and opens a new one.
///
/// Checked before each record against the state of the current segment, so a
/// `ByCount(n)` segment holds exactly `n` records.
#[derive(Debug, Clone)]
pub enum RollStrategy {
    BySize(u64),
    ByTime(Duration),
    ByCount(u64),
    Combined(Vec<RollStrategy>),
}

impl RollStrategy {
    pub fn should_roll(&self, current_size: u64, elapsed: Duration, count: u64) -> bool {
        match self {
            Self::BySize(size) => current_size >= *size,
            Self::ByTime(duration) => elapsed >= *duration,
            Self::ByCount(max_count) => count >= *max_count,
            Self::Combined(strategies) => strategies
                .iter()
                .any(|s| s.should_roll(current_size, elapsed, count)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FlushMode {
    /// Hand each record to the OS, never fsync explicitly.
    Async,
    /// fsync after every record.
    Sync,
    /// fsync once `bytes` are pending or `interval` has passed.
    Batch { bytes: usize, interval: Duration },
}
