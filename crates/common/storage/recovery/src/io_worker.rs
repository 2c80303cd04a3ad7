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

//! Background writer for the recovery log.
//!
//! ## Architecture
//!
//! The IOWorker runs on a dedicated thread and receives [`RecoveryRecord`]s
//! from [`RecoveryAppender`](crate::RecoveryAppender)s via a bounded crossbeam
//! channel. It is the only writer of live segments, so records are persisted
//! in the order they were accepted.
//!
//! ```text
//! ┌──────────────┐     crossbeam      ┌──────────────┐    write(2)   ┌──────────────┐
//! │   Appender   │ ──── channel ────► │   IOWorker   │ ──────────►  │ live segment │
//! │ (try_send)   │    (bounded)       │  (bg thread) │              │    (.log)    │
//! └──────────────┘                    └──────────────┘              └──────────────┘
//! ```
//!
//! ## Responsibilities
//!
//! - **Persistence**: append one encoded line per record
//! - **Rolling**: open a new segment when the roll strategy triggers
//! - **Flushing**: sync per configured flush mode
//! - **Failure**: if a segment cannot be opened, mark the log fatal and stop

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info};

use crate::{
    FlushMode, RecoveryConfig, Result,
    appender::FatalState,
    error::WriterFailedSnafu,
    path::{SegmentKind, next_stamp, segment_path},
    record::RecoveryRecord,
    segment::SegmentWriter,
};

/// How long the worker waits for a record before checking for idle flushes.
const IDLE_POLL: Duration = Duration::from_millis(1);

pub struct IOWorker {
    /// Channel receiver for records from appenders.
    rx:            Receiver<RecoveryRecord>,
    config:        Arc<RecoveryConfig>,
    /// Live segment currently being appended to. Opened lazily.
    current:       Option<SegmentWriter>,
    /// Stamp of the newest live segment, on disk or opened by this worker.
    last_stamp:    u64,
    /// Bytes written since last sync (for batch flush mode).
    pending_bytes: usize,
    last_flush:    Instant,
    shutdown:      Arc<AtomicBool>,
    fatal:         FatalState,
}

impl IOWorker {
    pub fn new(
        rx: Receiver<RecoveryRecord>,
        config: Arc<RecoveryConfig>,
        shutdown: Arc<AtomicBool>,
        fatal: FatalState,
        last_stamp: u64,
    ) -> Self {
        Self {
            rx,
            config,
            current: None,
            last_stamp,
            pending_bytes: 0,
            last_flush: Instant::now(),
            shutdown,
            fatal,
        }
    }

    /// Main run loop.
    ///
    /// Processes records until shutdown is signaled, the channel disconnects,
    /// or the writer fails permanently. On shutdown, records still in the
    /// channel are drained before the final sync.
    pub fn run(&mut self) {
        info!(path = ?self.config.dir, "Recovery IOWorker starting");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Recovery IOWorker received shutdown signal");
                break;
            }

            match self.rx.recv_timeout(IDLE_POLL) {
                Ok(record) => {
                    if !self.persist(&record) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.check_flush() {
                        error!(error = ?e, "Failed to flush recovery segment");
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Recovery IOWorker channel disconnected");
                    break;
                }
            }
        }

        let mut drained = 0usize;
        while let Ok(record) = self.rx.try_recv() {
            if !self.persist(&record) {
                return;
            }
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Drained pending records on shutdown");
        }

        if let Err(e) = self.final_flush() {
            error!(error = ?e, "Failed to perform final flush");
        }

        info!("Recovery IOWorker stopped");
    }

    /// Write one record, returning `false` once the worker must stop.
    fn persist(&mut self, record: &RecoveryRecord) -> bool {
        match self.write_record(record) {
            Ok(()) => true,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Recovery writer stopped, records are no longer persisted");
                false
            }
            Err(e) => {
                error!(error = ?e, queue = %record.queue, "Failed to write recovery record");
                true
            }
        }
    }

    /// Open the next live segment, or mark the log fatal if that fails.
    fn open_segment(&mut self) -> Result<SegmentWriter> {
        let stamp = next_stamp(self.last_stamp);
        let path = segment_path(&self.config.dir, SegmentKind::Live, stamp);

        match SegmentWriter::create(&path) {
            Ok(segment) => {
                self.last_stamp = stamp;
                debug!(path = ?path, "Opened live segment");
                Ok(segment)
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = self.fatal.set(reason.clone());
                WriterFailedSnafu { reason }.fail()
            }
        }
    }

    /// Close the current segment. The next record opens a new one.
    fn roll_segment(&mut self) -> Result<()> {
        if let Some(segment) = self.current.take() {
            segment.sync()?;
            info!(
                path = ?segment.path(),
                records = segment.records(),
                size = segment.size(),
                "Rolled recovery segment"
            );
        }
        self.pending_bytes = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    fn write_record(&mut self, record: &RecoveryRecord) -> Result<()> {
        if let Some(segment) = &self.current
            && self.config.roll_strategy.should_roll(
                segment.size(),
                segment.elapsed(),
                segment.records(),
            )
        {
            self.roll_segment()?;
        }

        let segment = match self.current.take() {
            Some(segment) => segment,
            None => self.open_segment()?,
        };
        let segment = self.current.insert(segment);
        let written = segment.append(record)?;

        self.pending_bytes += usize::try_from(written).unwrap_or(usize::MAX);
        self.handle_flush()
    }

    /// Handle flush based on the configured flush mode.
    ///
    /// - `Sync`: sync after every record
    /// - `Batch`: sync when the byte threshold or interval is exceeded
    /// - `Async`: leave it to the OS
    fn handle_flush(&mut self) -> Result<()> {
        let should_sync = match &self.config.flush_mode {
            FlushMode::Sync => true,
            FlushMode::Batch { bytes, interval } => {
                self.pending_bytes >= *bytes || self.last_flush.elapsed() >= *interval
            }
            FlushMode::Async => false,
        };

        if should_sync {
            self.sync_current()?;
        }
        Ok(())
    }

    /// Time-based flush while idle.
    fn check_flush(&mut self) -> Result<()> {
        if let FlushMode::Batch { interval, .. } = &self.config.flush_mode
            && self.pending_bytes > 0
            && self.last_flush.elapsed() >= *interval
        {
            self.sync_current()?;
        }
        Ok(())
    }

    fn sync_current(&mut self) -> Result<()> {
        if let Some(segment) = &self.current {
            segment.sync()?;
        }
        self.pending_bytes = 0;
        self.last_flush = Instant::now();
        Ok(())
    }

    fn final_flush(&mut self) -> Result<()> {
        self.sync_current()?;
        if let Some(segment) = &self.current {
            info!(
                path = ?segment.path(),
                records = segment.records(),
                "Final flush complete"
            );
        }
        Ok(())
    }
}
