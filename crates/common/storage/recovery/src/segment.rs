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

//! Line-oriented segment files.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use snafu::ResultExt;
use tracing::warn;

use crate::{Result, error::SegmentIoSnafu, record::RecoveryRecord};

/// Append-only writer for one segment.
pub struct SegmentWriter {
    file:      File,
    path:      PathBuf,
    size:      u64,
    records:   u64,
    opened_at: Instant,
}

impl SegmentWriter {
    /// Create a new, empty segment. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(SegmentIoSnafu { path: parent })?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .context(SegmentIoSnafu { path: &path })?;

        Ok(Self {
            file,
            path,
            size: 0,
            records: 0,
            opened_at: Instant::now(),
        })
    }

    /// Append one record as a single line.
    pub fn append(&mut self, record: &RecoveryRecord) -> Result<u64> {
        let line = record.encode_line();
        self.file
            .write_all(line.as_bytes())
            .context(SegmentIoSnafu { path: &self.path })?;

        let written = line.len() as u64;
        self.size += written;
        self.records += 1;
        Ok(written)
    }

    /// Force written records to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_data()
            .context(SegmentIoSnafu { path: &self.path })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Bytes written so far.
    pub const fn size(&self) -> u64 { self.size }

    /// Records written so far.
    pub const fn records(&self) -> u64 { self.records }

    /// Time since the segment was opened.
    pub fn elapsed(&self) -> Duration { self.opened_at.elapsed() }
}

/// Outcome of reading a single segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStats {
    /// Lines that decoded into a record.
    pub records:   u64,
    /// Lines that were skipped.
    pub malformed: u64,
}

/// Reads every record of a segment in order, handing each to `visit`.
///
/// Lines that fail to decode, and a trailing line without its newline (a
/// torn write), are logged and skipped.
pub fn read_segment<P, F>(path: P, mut visit: F) -> Result<SegmentStats>
where
    P: AsRef<Path>,
    F: FnMut(RecoveryRecord),
{
    let path = path.as_ref();
    let file = File::open(path).context(SegmentIoSnafu { path })?;
    let mut reader = BufReader::new(file);

    let mut stats = SegmentStats::default();
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .context(SegmentIoSnafu { path })?;
        if read == 0 {
            break;
        }
        line_no += 1;

        if buf.last() != Some(&b'\n') {
            warn!(path = ?path, line_no, "Skipping torn record at end of segment");
            stats.malformed += 1;
            break;
        }

        let decoded = std::str::from_utf8(&buf)
            .map_err(|e| e.to_string())
            .and_then(|line| RecoveryRecord::decode(line).map_err(|e| e.to_string()));

        match decoded {
            Ok(record) => {
                stats.records += 1;
                visit(record);
            }
            Err(error) => {
                warn!(path = ?path, line_no, %error, "Skipping malformed recovery record");
                stats.malformed += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::record::Method;

    #[test]
    fn test_write_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("live-00000000000000000001.log");

        let mut writer = SegmentWriter::create(&path).unwrap();
        writer.append(&RecoveryRecord::set("q", "a b")).unwrap();
        writer.append(&RecoveryRecord::get("q", "a b")).unwrap();
        writer.append(&RecoveryRecord::delete("q")).unwrap();
        writer.sync().unwrap();

        assert_eq!(writer.records(), 3);
        assert_eq!(writer.size(), std::fs::metadata(&path).unwrap().len());

        let mut seen = Vec::new();
        let stats = read_segment(&path, |record| seen.push(record)).unwrap();

        assert_eq!(stats.records, 3);
        assert_eq!(stats.malformed, 0);
        assert_eq!(
            seen.iter().map(|r| r.method).collect::<Vec<_>>(),
            vec![Method::Set, Method::Get, Method::Del]
        );
        assert_eq!(seen[0].message, "a b");
    }

    #[test]
    fn test_create_refuses_existing_segment() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("live-00000000000000000001.log");
        std::fs::write(&path, b"").unwrap();

        assert!(SegmentWriter::create(&path).is_err());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("live-00000000000000000001.log");
        let mut content = Vec::new();
        content.extend_from_slice(b"SET+q+one\n");
        content.extend_from_slice(b"garbage\n");
        content.extend_from_slice(&[0xFF, 0xFE, b'\n']);
        content.extend_from_slice(b"PUT+q+x\n");
        content.extend_from_slice(b"SET+q+two\n");
        std::fs::write(&path, content).unwrap();

        let mut seen = Vec::new();
        let stats = read_segment(&path, |record| seen.push(record.message)).unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(stats.malformed, 3);
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_torn_tail_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("live-00000000000000000001.log");
        std::fs::write(&path, b"SET+q+one\nSET+q+tw").unwrap();

        let mut seen = Vec::new();
        let stats = read_segment(&path, |record| seen.push(record.message)).unwrap();

        assert_eq!(seen, vec!["one".to_string()]);
        assert_eq!(stats.malformed, 1);
    }
}
