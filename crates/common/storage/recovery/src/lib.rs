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

//! Append-only recovery log for in-memory queues.
//!
//! Every queue mutation is written as one escaped text line to a rotating
//! set of segment files. On startup the segments are replayed into a
//! [`Tally`] of net message counts; [`compact`] rewrites all but the newest
//! segment into smaller baselines with the same tally.

pub mod appender;
pub mod builder;
pub mod compaction;
pub mod config;
pub mod error;
mod io_worker;
pub mod log;
pub mod path;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod tally;

pub use appender::RecoveryAppender;
pub use builder::RecoveryLogBuilder;
pub use compaction::{CompactionReport, compact};
pub use config::{FlushMode, RecoveryConfig, RollStrategy};
pub use error::{RecoveryError, Result};
pub use log::RecoveryLog;
pub use record::{Method, RecoveryRecord};
pub use recovery::{Replay, ReplayReport, replay_dir};
pub use tally::Tally;
