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

//! Record producer for the recovery log.
//!
//! The [`RecoveryAppender`] hands records to the `IOWorker` over a bounded
//! channel and never waits: a full channel is reported as
//! [`RecoveryError::Backpressure`](crate::RecoveryError::Backpressure) and the
//! record is dropped. Once the writer has failed permanently every append is
//! rejected with
//! [`RecoveryError::WriterFailed`](crate::RecoveryError::WriterFailed).
//!
//! Appenders are cheap to clone and may be used from any thread. Records from
//! a single appender reach disk in the order they were accepted.

use std::sync::{Arc, OnceLock};

use crossbeam::channel::{Sender, TrySendError};
use snafu::ensure;

use crate::{
    Result,
    error::{BackpressureSnafu, ChannelClosedSnafu, WriterFailedSnafu},
    record::RecoveryRecord,
};

/// Reason the writer stopped, set once by the `IOWorker`.
pub(crate) type FatalState = Arc<OnceLock<String>>;

#[derive(Clone)]
pub struct RecoveryAppender {
    tx:       Sender<RecoveryRecord>,
    fatal:    FatalState,
    capacity: usize,
}

impl RecoveryAppender {
    pub(crate) const fn new(tx: Sender<RecoveryRecord>, fatal: FatalState, capacity: usize) -> Self {
        Self {
            tx,
            fatal,
            capacity,
        }
    }

    /// Queue a record for the writer without blocking.
    ///
    /// # Errors
    ///
    /// - `WriterFailed` if the writer has stopped permanently
    /// - `Backpressure` if the pending-record channel is full
    /// - `ChannelClosed` if the writer has shut down
    pub fn append(&self, record: RecoveryRecord) -> Result<()> {
        ensure!(
            !self.is_fatal(),
            WriterFailedSnafu {
                reason: self.fatal_reason().unwrap_or_default(),
            }
        );

        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => BackpressureSnafu {
                capacity: self.capacity,
            }
            .fail(),
            Err(TrySendError::Disconnected(_)) => ChannelClosedSnafu.fail(),
        }
    }

    /// Whether the writer has stopped permanently.
    #[must_use]
    pub fn is_fatal(&self) -> bool { self.fatal.get().is_some() }

    #[must_use]
    pub fn fatal_reason(&self) -> Option<String> { self.fatal.get().cloned() }

    /// Records accepted but not yet taken by the writer.
    #[must_use]
    pub fn pending(&self) -> usize { self.tx.len() }
}

#[cfg(test)]
mod tests {
    use crossbeam::channel::bounded;

    use super::*;
    use crate::RecoveryError;

    fn appender(capacity: usize) -> (RecoveryAppender, crossbeam::channel::Receiver<RecoveryRecord>) {
        let (tx, rx) = bounded(capacity);
        (
            RecoveryAppender::new(tx, Arc::new(OnceLock::new()), capacity),
            rx,
        )
    }

    #[test]
    fn test_append_preserves_order() {
        let (appender, rx) = appender(4);

        appender.append(RecoveryRecord::set("q", "1")).unwrap();
        appender.append(RecoveryRecord::set("q", "2")).unwrap();

        assert_eq!(appender.pending(), 2);
        assert_eq!(rx.try_recv().unwrap().message, "1");
        assert_eq!(rx.try_recv().unwrap().message, "2");
    }

    #[test]
    fn test_full_channel_is_backpressure() {
        let (appender, _rx) = appender(1);

        appender.append(RecoveryRecord::set("q", "1")).unwrap();
        let err = appender.append(RecoveryRecord::set("q", "2")).unwrap_err();

        assert!(matches!(err, RecoveryError::Backpressure { capacity: 1 }));
    }

    #[test]
    fn test_disconnected_channel() {
        let (appender, rx) = appender(1);
        drop(rx);

        let err = appender.append(RecoveryRecord::delete("q")).unwrap_err();
        assert!(matches!(err, RecoveryError::ChannelClosed));
    }

    #[test]
    fn test_fatal_rejects_appends() {
        let (appender, rx) = appender(4);
        let clone = appender.clone();
        appender.fatal.set("disk gone".to_string()).unwrap();

        let err = clone.append(RecoveryRecord::set("q", "1")).unwrap_err();

        assert!(clone.is_fatal());
        assert!(err.is_fatal());
        assert!(matches!(err, RecoveryError::WriterFailed { ref reason } if reason == "disk gone"));
        assert!(rx.is_empty());
    }
}
