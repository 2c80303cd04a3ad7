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

//! Startup replay of the recovery log.
//!
//! Replay reads every segment in name order and folds each record into a
//! [`Tally`]. The caller then refills its queues from the tally's positive
//! counts. Replay runs before the writer starts, so the segments it reads are
//! never concurrently appended to.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{
    Result,
    path::{SegmentKind, last_stamp, scan_segments},
    segment::read_segment,
    tally::Tally,
};

/// Counters describing one replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub segments:  usize,
    pub records:   u64,
    pub malformed: u64,
}

/// Tally and counters produced by a replay.
#[derive(Debug, Default)]
pub struct Replay {
    pub tally:  Tally,
    pub report: ReplayReport,
}

/// State needed to open the log after replay.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    pub replay:          Replay,
    /// Stamp of the newest live segment; the writer's next segment is
    /// stamped strictly after it.
    pub last_live_stamp: u64,
}

/// Replay `segments` in the given order.
pub fn replay_segments(segments: &[PathBuf]) -> Result<Replay> {
    let mut replay = Replay::default();

    for path in segments {
        let stats = read_segment(path, |record| replay.tally.apply(record))?;
        debug!(
            path = ?path,
            records = stats.records,
            malformed = stats.malformed,
            "Replayed segment"
        );

        replay.report.segments += 1;
        replay.report.records += stats.records;
        replay.report.malformed += stats.malformed;
    }

    if replay.report.malformed > 0 {
        warn!(
            malformed = replay.report.malformed,
            "Replay skipped malformed records"
        );
    }

    Ok(replay)
}

/// Replay every segment under `dir`.
pub fn replay_dir<P: AsRef<Path>>(dir: P) -> Result<Replay> {
    let segments = scan_segments(dir)?;
    replay_segments(&segments)
}

/// Scan `dir`, replay it, and find where the writer should resume.
pub fn recover<P: AsRef<Path>>(dir: P) -> Result<RecoveryResult> {
    let dir = dir.as_ref();
    info!(path = ?dir, "Starting recovery log replay");

    let segments = scan_segments(dir)?;
    let replay = replay_segments(&segments)?;
    let last_live_stamp = last_stamp(&segments, SegmentKind::Live).unwrap_or_default();

    info!(
        segments = replay.report.segments,
        records = replay.report.records,
        malformed = replay.report.malformed,
        messages = replay.tally.total(),
        "Recovery log replay complete"
    );

    Ok(RecoveryResult {
        replay,
        last_live_stamp,
    })
}
