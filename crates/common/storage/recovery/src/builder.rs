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

use std::path::PathBuf;

use crate::{FlushMode, RecoveryConfig, RecoveryLog, Result, RollStrategy, recovery::Replay};

pub struct RecoveryLogBuilder {
    config: RecoveryConfig,
}

impl RecoveryLogBuilder {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            config: RecoveryConfig {
                dir: dir.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub const fn from_config(config: RecoveryConfig) -> Self { Self { config } }

    #[must_use]
    pub fn roll_strategy(mut self, strategy: RollStrategy) -> Self {
        self.config.roll_strategy = strategy;
        self
    }

    #[must_use]
    pub fn segment_records(self, records: u64) -> Self {
        self.roll_strategy(RollStrategy::ByCount(records))
    }

    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Replay existing segments and start the writer.
    pub fn build(self) -> Result<(RecoveryLog, Replay)> { RecoveryLog::open(self.config) }
}
