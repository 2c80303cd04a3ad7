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

//! Segment naming and discovery.
//!
//! Segment names sort lexicographically in replay order:
//!
//! ```text
//! base-01768723200000000001.log   compacted baseline (only SET records)
//! live-01768723200123456789.log   written by the recovery writer
//! ```
//!
//! `base-` sorts before `live-`, so a baseline is always replayed before any
//! live segment, including the tail the compactor left in place.

use std::path::{Path, PathBuf};

use chrono::Utc;
use snafu::ResultExt;

use crate::{Result, error::SegmentIoSnafu};

/// Extension shared by every segment file.
pub const SEGMENT_EXTENSION: &str = "log";

/// Extension of a baseline that is still being written.
pub const PARTIAL_EXTENSION: &str = "tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Baseline,
    Live,
}

impl SegmentKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Baseline => "base-",
            Self::Live => "live-",
        }
    }
}

/// Generates a segment file name: `{kind}-{stamp:020}.log`.
pub fn segment_file_name(kind: SegmentKind, stamp: u64) -> String {
    format!("{}{stamp:020}.{SEGMENT_EXTENSION}", kind.prefix())
}

/// Returns full path to a segment file.
pub fn segment_path<P: AsRef<Path>>(dir: P, kind: SegmentKind, stamp: u64) -> PathBuf {
    dir.as_ref().join(segment_file_name(kind, stamp))
}

/// Parses `(kind, stamp)` back out of a segment path.
pub fn parse_segment_name(path: &Path) -> Option<(SegmentKind, u64)> {
    if path.extension().and_then(|s| s.to_str()) != Some(SEGMENT_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    [SegmentKind::Baseline, SegmentKind::Live]
        .into_iter()
        .find_map(|kind| {
            stem.strip_prefix(kind.prefix())
                .and_then(|stamp| stamp.parse().ok())
                .map(|stamp| (kind, stamp))
        })
}

/// Current wall clock in nanoseconds since the Unix epoch.
pub fn now_stamp() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .unwrap_or_default()
}

/// Next stamp strictly greater than `last`, following the wall clock when it
/// moves forward.
pub fn next_stamp(last: u64) -> u64 { now_stamp().max(last.saturating_add(1)) }

/// Lists all segments in `dir`, sorted by file name (replay order).
///
/// Files that are not segments, including partial baselines, are ignored. A
/// missing directory yields an empty list.
pub fn scan_segments<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir).context(SegmentIoSnafu { path: dir })? {
        let path = entry.context(SegmentIoSnafu { path: dir })?.path();
        if path.is_file() && parse_segment_name(&path).is_some() {
            segments.push(path);
        }
    }

    segments.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(segments)
}

/// Highest stamp of any segment of `kind` in `segments`.
pub fn last_stamp(segments: &[PathBuf], kind: SegmentKind) -> Option<u64> {
    segments
        .iter()
        .filter_map(|path| parse_segment_name(path))
        .filter(|(k, _)| *k == kind)
        .map(|(_, stamp)| stamp)
        .max()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(
            segment_file_name(SegmentKind::Live, 42),
            "live-00000000000000000042.log"
        );
        assert_eq!(
            segment_file_name(SegmentKind::Baseline, 1_768_723_200_000_000_000),
            "base-01768723200000000000.log"
        );
    }

    #[test]
    fn test_baseline_sorts_before_live() {
        let baseline = segment_file_name(SegmentKind::Baseline, u64::MAX);
        let live = segment_file_name(SegmentKind::Live, 0);
        assert!(baseline < live);
    }

    #[test]
    fn test_names_sort_by_stamp() {
        let early = segment_file_name(SegmentKind::Live, 999);
        let late = segment_file_name(SegmentKind::Live, 1000);
        assert!(early < late);
    }

    #[test_case("live-00000000000000000007.log", Some((SegmentKind::Live, 7)) ; "live")]
    #[test_case("base-00000000000000000009.log", Some((SegmentKind::Baseline, 9)) ; "baseline")]
    #[test_case("base-00000000000000000009.log.tmp", None ; "partial baseline")]
    #[test_case("live-abc.log", None ; "bad stamp")]
    #[test_case("notes.txt", None ; "unrelated file")]
    fn test_parse_segment_name(name: &str, expected: Option<(SegmentKind, u64)>) {
        assert_eq!(parse_segment_name(Path::new(name)), expected);
    }

    #[test]
    fn test_next_stamp_is_strictly_increasing() {
        let far_future = now_stamp() + 1_000_000_000_000;
        assert_eq!(next_stamp(far_future), far_future + 1);
        assert!(next_stamp(0) > 0);
    }

    #[test]
    fn test_scan_segments() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path();

        let live = segment_path(dir, SegmentKind::Live, 5);
        let older_live = segment_path(dir, SegmentKind::Live, 3);
        let baseline = segment_path(dir, SegmentKind::Baseline, 10);

        for path in [&live, &older_live, &baseline] {
            std::fs::File::create(path).unwrap();
        }
        std::fs::File::create(dir.join("base-00000000000000000001.log.tmp")).unwrap();
        std::fs::File::create(dir.join("README")).unwrap();

        let segments = scan_segments(dir).unwrap();
        assert_eq!(segments, vec![baseline, older_live, live]);
        assert_eq!(last_stamp(&segments, SegmentKind::Live), Some(5));
        assert_eq!(last_stamp(&segments, SegmentKind::Baseline), Some(10));
    }

    #[test]
    fn test_scan_missing_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let segments = scan_segments(temp_dir.path().join("absent")).unwrap();
        assert!(segments.is_empty());
    }
}
