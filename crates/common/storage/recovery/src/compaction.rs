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

//! Compaction of the recovery log.
//!
//! All segments except the newest are replayed into a [`Tally`], rewritten as
//! baseline segments holding one `SET` per surviving message, and then
//! removed. The newest segment may still be open in a running writer and is
//! never read, rewritten, or removed, so compaction can run while a server
//! keeps appending to the same directory.
//!
//! Baselines are written under a `.tmp` name, synced, and renamed into place
//! before any input segment is removed. A crash in between leaves both the
//! baselines and their inputs on disk, so messages may be replayed twice but
//! are never lost.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    Result, RollStrategy,
    error::SegmentIoSnafu,
    path::{
        PARTIAL_EXTENSION, SEGMENT_EXTENSION, SegmentKind, last_stamp, next_stamp, scan_segments,
        segment_path,
    },
    record::RecoveryRecord,
    recovery::replay_segments,
    segment::SegmentWriter,
    tally::Tally,
};

/// Outcome of one compaction pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Input segments replayed and removed.
    pub segments_compacted: usize,
    /// `SET` records written to baselines.
    pub records_written:    u64,
    pub baselines_written:  usize,
    /// Lines in the inputs that could not be decoded.
    pub malformed:          u64,
}

/// Compact every segment under `dir` except the newest.
///
/// Baselines are split with `roll_strategy`, evaluated as if each baseline
/// were opened just now.
pub fn compact<P: AsRef<Path>>(dir: P, roll_strategy: &RollStrategy) -> Result<CompactionReport> {
    let dir = dir.as_ref();
    remove_partial_baselines(dir)?;

    let segments = scan_segments(dir)?;
    let Some((tail, inputs)) = segments.split_last() else {
        info!(path = ?dir, "No segments to compact");
        return Ok(CompactionReport::default());
    };
    if inputs.is_empty() {
        info!(path = ?dir, tail = ?tail, "Only the newest segment exists, nothing to compact");
        return Ok(CompactionReport::default());
    }

    info!(path = ?dir, inputs = inputs.len(), tail = ?tail, "Starting compaction");

    let replay = replay_segments(inputs)?;
    let last_baseline = last_stamp(&segments, SegmentKind::Baseline).unwrap_or_default();

    let mut baselines = BaselineWriter::new(dir, roll_strategy, last_baseline);
    write_baselines(&mut baselines, &replay.tally)?;
    let (baselines_written, records_written) = baselines.finish()?;

    for path in inputs {
        std::fs::remove_file(path).context(SegmentIoSnafu { path })?;
        debug!(path = ?path, "Removed compacted segment");
    }

    let report = CompactionReport {
        segments_compacted: inputs.len(),
        records_written,
        baselines_written,
        malformed: replay.report.malformed,
    };

    info!(
        segments_compacted = report.segments_compacted,
        records_written = report.records_written,
        baselines_written = report.baselines_written,
        malformed = report.malformed,
        "Compaction complete"
    );

    Ok(report)
}

fn write_baselines(baselines: &mut BaselineWriter<'_>, tally: &Tally) -> Result<()> {
    for (queue, message, count) in tally.iter() {
        let record = RecoveryRecord::set(queue, message);
        for _ in 0..count {
            baselines.append(&record)?;
        }
    }
    Ok(())
}

/// Removes `.log.tmp` files left behind by an interrupted compaction.
fn remove_partial_baselines(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let suffix = format!(".{SEGMENT_EXTENSION}.{PARTIAL_EXTENSION}");
    for entry in std::fs::read_dir(dir).context(SegmentIoSnafu { path: dir })? {
        let path = entry.context(SegmentIoSnafu { path: dir })?.path();
        let is_partial = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&suffix));
        if is_partial {
            warn!(path = ?path, "Removing partial baseline from interrupted compaction");
            std::fs::remove_file(&path).context(SegmentIoSnafu { path: &path })?;
        }
    }
    Ok(())
}

struct OpenBaseline {
    writer:     SegmentWriter,
    final_path: PathBuf,
}

/// Writes baseline segments, rolling them by the configured strategy.
struct BaselineWriter<'a> {
    dir:           &'a Path,
    roll_strategy: &'a RollStrategy,
    last_stamp:    u64,
    current:       Option<OpenBaseline>,
    written:       usize,
    records:       u64,
}

impl<'a> BaselineWriter<'a> {
    const fn new(dir: &'a Path, roll_strategy: &'a RollStrategy, last_stamp: u64) -> Self {
        Self {
            dir,
            roll_strategy,
            last_stamp,
            current: None,
            written: 0,
            records: 0,
        }
    }

    fn append(&mut self, record: &RecoveryRecord) -> Result<()> {
        if let Some(open) = &self.current
            && self.roll_strategy.should_roll(
                open.writer.size(),
                Duration::ZERO,
                open.writer.records(),
            )
        {
            self.seal()?;
        }

        let open = match self.current.take() {
            Some(open) => open,
            None => self.open()?,
        };
        let open = self.current.insert(open);
        open.writer.append(record)?;
        self.records += 1;
        Ok(())
    }

    fn open(&mut self) -> Result<OpenBaseline> {
        let stamp = next_stamp(self.last_stamp);
        self.last_stamp = stamp;

        let final_path = segment_path(self.dir, SegmentKind::Baseline, stamp);
        let partial_path =
            final_path.with_extension(format!("{SEGMENT_EXTENSION}.{PARTIAL_EXTENSION}"));
        debug!(path = ?partial_path, "Opening baseline segment");

        Ok(OpenBaseline {
            writer: SegmentWriter::create(partial_path)?,
            final_path,
        })
    }

    /// Sync the open baseline and move it to its final name.
    fn seal(&mut self) -> Result<()> {
        let Some(OpenBaseline { writer, final_path }) = self.current.take() else {
            return Ok(());
        };

        writer.sync()?;
        std::fs::rename(writer.path(), &final_path).context(SegmentIoSnafu { path: &final_path })?;
        self.written += 1;
        debug!(path = ?final_path, records = writer.records(), "Sealed baseline segment");
        Ok(())
    }

    /// Seal the last baseline and return `(baselines, records)` written.
    fn finish(mut self) -> Result<(usize, u64)> {
        self.seal()?;
        Ok((self.written, self.records))
    }
}
