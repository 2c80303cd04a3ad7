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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Recovery log errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecoveryError {
    /// Filesystem I/O failure not tied to a particular segment.
    #[snafu(context(false), display("IO error: {source}"))]
    Io { source: io::Error },

    /// I/O failure while reading, writing, or removing a segment.
    #[snafu(display("IO error on segment {}: {source}", path.display()))]
    SegmentIo { path: PathBuf, source: io::Error },

    /// The pending-record channel is full; the record was not accepted.
    #[snafu(display("Recovery channel is full ({capacity} pending records)"))]
    Backpressure { capacity: usize },

    /// The writer thread has stopped receiving records.
    #[snafu(display("Recovery channel is closed"))]
    ChannelClosed,

    /// The writer could not open a segment and will not make progress.
    #[snafu(display("Recovery writer failed: {reason}"))]
    WriterFailed { reason: String },

    /// The recovery directory is missing or not a directory.
    #[snafu(display("Invalid recovery directory: {}", path.display()))]
    InvalidLogDir { path: PathBuf },

    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

impl RecoveryError {
    /// Whether the writer is permanently unable to persist records.
    #[must_use]
    pub const fn is_fatal(&self) -> bool { matches!(self, Self::WriterFailed { .. }) }
}

/// Result type for recovery log operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;
