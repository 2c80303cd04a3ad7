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

//! Recovery log lifecycle.
//!
//! [`RecoveryLog`] replays the existing segments, then spawns the background
//! [`IOWorker`] that persists new records. Callers refill their in-memory
//! state from the returned [`Replay`] before accepting traffic.
//!
//! ## Usage
//!
//! ```ignore
//! let (log, replay) = RecoveryLogBuilder::new("/var/lib/lmq/recovery").build()?;
//! for (queue, message, count) in replay.tally.iter() {
//!     // push `message` onto `queue` `count` times
//! }
//!
//! let appender = log.create_appender()?;
//! appender.append(RecoveryRecord::set("jobs", "hello"))?;
//!
//! log.shutdown()?;
//! ```

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Sender, bounded};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::info;

use crate::{
    RecoveryConfig, Result,
    appender::{FatalState, RecoveryAppender},
    error::{ChannelClosedSnafu, InternalSnafu, InvalidLogDirSnafu, SegmentIoSnafu},
    io_worker::IOWorker,
    record::RecoveryRecord,
    recovery::{RecoveryResult, Replay, recover},
};

/// An append-only, replayable log of queue mutations.
pub struct RecoveryLog {
    config:           Arc<RecoveryConfig>,
    /// Sender side of the channel to the `IOWorker`. `None` after shutdown.
    io_tx:            Option<Sender<RecoveryRecord>>,
    fatal:            FatalState,
    shutdown_flag:    Arc<AtomicBool>,
    io_worker_handle: Option<JoinHandle<()>>,
}

impl RecoveryLog {
    /// Replay the log directory and start the writer.
    ///
    /// Creates the directory if needed. Replay finishes before the writer
    /// thread exists, so no record written by this process is replayed.
    pub(crate) fn open(config: RecoveryConfig) -> Result<(Self, Replay)> {
        let config = Arc::new(config);

        std::fs::create_dir_all(&config.dir).context(SegmentIoSnafu { path: &config.dir })?;
        ensure!(
            config.dir.is_dir(),
            InvalidLogDirSnafu {
                path: config.dir.clone(),
            }
        );

        let RecoveryResult {
            replay,
            last_live_stamp,
        } = recover(&config.dir)?;

        let (io_tx, io_rx) = bounded(config.channel_capacity.max(1));
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let fatal: FatalState = Arc::new(OnceLock::new());

        let io_worker = IOWorker::new(
            io_rx,
            config.clone(),
            shutdown_flag.clone(),
            fatal.clone(),
            last_live_stamp,
        );

        let io_worker_handle = thread::Builder::new()
            .name("recovery-io-worker".into())
            .spawn(move || {
                let mut worker = io_worker;
                worker.run();
            })?;

        info!(
            path = ?config.dir,
            channel_capacity = config.channel_capacity,
            "Recovery log opened"
        );

        Ok((
            Self {
                config,
                io_tx: Some(io_tx),
                fatal,
                shutdown_flag,
                io_worker_handle: Some(io_worker_handle),
            },
            replay,
        ))
    }

    /// Create a new appender for queueing records.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` if the log has been shut down.
    pub fn create_appender(&self) -> Result<RecoveryAppender> {
        let tx = self.io_tx.clone().context(ChannelClosedSnafu)?;
        Ok(RecoveryAppender::new(
            tx,
            self.fatal.clone(),
            self.config.channel_capacity.max(1),
        ))
    }

    /// Whether the writer has stopped permanently.
    #[must_use]
    pub fn is_fatal(&self) -> bool { self.fatal.get().is_some() }

    #[must_use]
    pub fn config(&self) -> &RecoveryConfig { &self.config }

    /// Stop the writer after it drains pending records and syncs.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer thread panicked.
    pub fn shutdown(mut self) -> Result<()> {
        info!("Shutting down recovery log");

        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.io_tx.take();

        if let Some(handle) = self.io_worker_handle.take() {
            handle.join().map_err(|_| {
                InternalSnafu {
                    message: "Recovery IO worker thread panicked".to_string(),
                }
                .build()
            })?;
        }

        info!("Recovery log shutdown complete");
        Ok(())
    }
}

impl Drop for RecoveryLog {
    fn drop(&mut self) {
        if self.io_worker_handle.is_some() {
            self.shutdown_flag.store(true, Ordering::SeqCst);
        }
    }
}
