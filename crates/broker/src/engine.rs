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

//! Request-level queue operations.
//!
//! Every mutating operation changes the in-memory queue first and then hands
//! a record to the recovery log. Neither step waits: a full queue without
//! growth fails with `Capacity`, a full record channel fails with
//! `DurabilityGap`. A `DurabilityGap` does not undo the mutation:
//!
//! | operation | on `DurabilityGap`                                  |
//! |-----------|-----------------------------------------------------|
//! | `set`     | message stays queued but is not in the log          |
//! | `get`     | message is already popped and is not returned       |
//! | `delete`  | queue is gone but will reappear after a restart     |
//!
//! A record is handed to the log while the queue is still pinned in the
//! registry, so a `delete` racing a `set` or `get` on the same queue is
//! logged in the order it took effect in memory.
//!
//! `skip` rotates messages from the front to the back of a queue without
//! logging anything.

use std::sync::Arc;

use lmq_common_storage_recovery::{
    Method, RecoveryAppender, RecoveryRecord, Tally, record::FIELD_DELIMITER,
};
use snafu::{OptionExt, ensure};
use tracing::{debug, error, warn};

use crate::{
    buffer::GrowableQueue,
    config::BrokerConfig,
    error::{
        BrokerError, CapacitySnafu, FatalSnafu, InvalidSnafu, QueueEmptySnafu, QueueNotFoundSnafu,
        Result,
    },
    payload::{FileResolver, Payload, PayloadResolver},
    registry::{QueueRegistry, RestoreStats},
};

/// Destination of recovery records.
pub trait RecordSink: Send + Sync {
    /// Queue a record without blocking.
    fn append(&self, record: RecoveryRecord) -> lmq_common_storage_recovery::Result<()>;

    /// Why the sink stopped accepting records for good, if it has.
    fn fatal_reason(&self) -> Option<String>;
}

impl RecordSink for RecoveryAppender {
    fn append(&self, record: RecoveryRecord) -> lmq_common_storage_recovery::Result<()> {
        Self::append(self, record)
    }

    fn fatal_reason(&self) -> Option<String> { Self::fatal_reason(self) }
}

pub struct Broker {
    registry: QueueRegistry,
    sink:     Arc<dyn RecordSink>,
    resolver: Arc<dyn PayloadResolver>,
}

impl Broker {
    /// Create a broker that resolves `file:` references under
    /// `config.file_base_path`.
    pub fn new(config: &BrokerConfig, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            registry: QueueRegistry::new(config.queue_init_size, config.queue_growth),
            sink,
            resolver: Arc::new(FileResolver::new(&config.file_base_path)),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn PayloadResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Refill queues from a replayed tally. Nothing is logged.
    pub fn restore(&self, tally: &Tally) -> RestoreStats { self.registry.restore(tally) }

    #[must_use]
    pub const fn registry(&self) -> &QueueRegistry { &self.registry }

    /// Push `message` onto `queue`, creating the queue if needed.
    ///
    /// # Errors
    ///
    /// - `Fatal` if the recovery writer has stopped
    /// - `Invalid` for an empty message or a malformed queue name
    /// - `Capacity` if the queue is full and cannot grow
    /// - `DurabilityGap` if the message was queued but not logged
    pub fn set(&self, queue: &str, message: impl Into<String>) -> Result<()> {
        self.ensure_writable()?;
        validate_queue_name(queue)?;
        let message = message.into();
        ensure!(
            !message.is_empty(),
            InvalidSnafu {
                reason: "Message is empty!",
            }
        );

        self.registry.with_or_create(queue, |buffer| -> Result<()> {
            buffer.push(message.clone()).map_err(|_| {
                CapacitySnafu {
                    queue,
                    capacity: buffer.capacity(),
                }
                .build()
            })?;
            self.record(RecoveryRecord::set(queue, message))
        })
    }

    /// Check a reference with the payload resolver, then [`set`](Self::set).
    ///
    /// # Errors
    ///
    /// Everything `set` returns, plus the resolver's rejection.
    pub async fn publish(&self, queue: &str, message: &str) -> Result<()> {
        ensure!(
            !message.is_empty(),
            InvalidSnafu {
                reason: "Message is empty!",
            }
        );
        self.resolver.check(message).await?;
        self.set(queue, message)
    }

    /// Pop the oldest message of `queue`.
    ///
    /// # Errors
    ///
    /// - `Fatal` if the recovery writer has stopped
    /// - `QueueNotFound` / `QueueEmpty`
    /// - `DurabilityGap` if the pop was not logged; the message is lost
    pub fn get(&self, queue: &str) -> Result<String> {
        self.ensure_writable()?;
        self.registry
            .with_queue(queue, |buffer| -> Result<String> {
                let message = buffer.pop().context(QueueEmptySnafu { queue })?;
                self.record(RecoveryRecord::get(queue, message.clone()))?;
                Ok(message)
            })
            .context(QueueNotFoundSnafu { queue })?
    }

    /// [`get`](Self::get), then resolve the message into its payload. A
    /// message whose payload cannot be resolved is not requeued.
    ///
    /// # Errors
    ///
    /// Everything `get` returns, plus payload resolution failures.
    pub async fn fetch(&self, queue: &str) -> Result<Payload> {
        let message = self.get(queue)?;
        self.resolver.resolve(&message).await.map_err(|source| {
            warn!(queue, message, error = %source, "Fetched message could not be resolved");
            BrokerError::from(source)
        })
    }

    /// Resolve a reference without touching any queue.
    ///
    /// # Errors
    ///
    /// `Invalid` for an empty reference, otherwise payload resolution
    /// failures.
    pub async fn download(&self, reference: &str) -> Result<Payload> {
        ensure!(
            !reference.is_empty(),
            InvalidSnafu {
                reason: "Message is empty!",
            }
        );
        Ok(self.resolver.resolve(reference).await?)
    }

    /// Move `n` messages from the front of `queue` to its back and return
    /// how many moved.
    ///
    /// Rotating by the queue length restores the original order, so only
    /// `n % len` messages actually move and a huge `n` costs no more than a
    /// small one.
    ///
    /// # Errors
    ///
    /// `QueueNotFound` if the queue does not exist.
    pub fn skip(&self, queue: &str, n: usize) -> Result<usize> {
        let buffer = self.lookup(queue)?;
        let len = buffer.len();
        if len == 0 {
            return Ok(0);
        }

        let mut moved = 0;
        for _ in 0..n % len {
            let Some(message) = buffer.pop() else {
                break;
            };
            if let Err(message) = buffer.push(message) {
                error!(queue, message, "Skipped message could not be requeued");
                break;
            }
            moved += 1;
        }

        debug!(queue, requested = n, moved, "Queue skipped");
        Ok(moved)
    }

    /// Number of messages buffered in `queue`.
    ///
    /// # Errors
    ///
    /// `QueueNotFound` if the queue does not exist.
    pub fn count(&self, queue: &str) -> Result<usize> {
        self.registry
            .count(queue)
            .context(QueueNotFoundSnafu { queue })
    }

    /// Drop `queue` and all of its messages.
    ///
    /// # Errors
    ///
    /// - `Fatal` if the recovery writer has stopped
    /// - `QueueNotFound` if the queue does not exist
    /// - `DurabilityGap` if the deletion was not logged
    pub fn delete(&self, queue: &str) -> Result<()> {
        self.ensure_writable()?;
        let logged = self
            .registry
            .remove_with(queue, |_| self.record(RecoveryRecord::delete(queue)))
            .context(QueueNotFoundSnafu { queue })?;
        debug!(queue, "Queue deleted");
        logged
    }

    /// Names of all queues, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> { self.registry.names() }

    fn lookup(&self, queue: &str) -> Result<Arc<GrowableQueue>> {
        self.registry
            .get(queue)
            .context(QueueNotFoundSnafu { queue })
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.sink.fatal_reason() {
            Some(reason) => FatalSnafu { reason }.fail(),
            None => Ok(()),
        }
    }

    fn record(&self, record: RecoveryRecord) -> Result<()> {
        let queue = record.queue.clone();
        let method: Method = record.method;

        self.sink.append(record).map_err(|source| {
            error!(queue, %method, error = %source, "Recovery record dropped");
            BrokerError::DurabilityGap {
                queue,
                method,
                source,
            }
        })
    }
}

/// Queue names become one field of a space-delimited log line.
fn validate_queue_name(queue: &str) -> Result<()> {
    ensure!(
        !queue.is_empty() && !queue.contains(FIELD_DELIMITER),
        InvalidSnafu {
            reason: "Queue name is invalid!",
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use lmq_common_storage_recovery::RecoveryError;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::PayloadError;

    /// Records appends in memory; can be switched to reject or die.
    #[derive(Default)]
    struct MemorySink {
        records:  Mutex<Vec<RecoveryRecord>>,
        rejected: std::sync::atomic::AtomicBool,
        fatal:    OnceLock<String>,
    }

    impl MemorySink {
        fn reject(&self, rejected: bool) {
            self.rejected
                .store(rejected, std::sync::atomic::Ordering::SeqCst);
        }

        fn records(&self) -> Vec<RecoveryRecord> { self.records.lock().clone() }
    }

    impl RecordSink for MemorySink {
        fn append(&self, record: RecoveryRecord) -> lmq_common_storage_recovery::Result<()> {
            if self.rejected.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(RecoveryError::Backpressure { capacity: 1 });
            }
            self.records.lock().push(record);
            Ok(())
        }

        fn fatal_reason(&self) -> Option<String> { self.fatal.get().cloned() }
    }

    struct TestFixture {
        sink:   Arc<MemorySink>,
        broker: Broker,
    }

    impl TestFixture {
        fn new() -> Self { Self::with_config(&BrokerConfig::default()) }

        fn with_config(config: &BrokerConfig) -> Self {
            let sink = Arc::new(MemorySink::default());
            let broker = Broker::new(config, sink.clone());
            Self { sink, broker }
        }
    }

    #[test]
    fn test_set_count_get_empty() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        broker.set("jobs", "a").unwrap();
        assert_eq!(broker.count("jobs").unwrap(), 1);
        assert_eq!(broker.get("jobs").unwrap(), "a");

        let err = broker.get("jobs").unwrap_err();
        assert!(matches!(err, BrokerError::QueueEmpty { .. }));

        assert_eq!(fixture.sink.records(), vec![
            RecoveryRecord::set("jobs", "a"),
            RecoveryRecord::get("jobs", "a"),
        ]);
    }

    #[test]
    fn test_duplicate_messages() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        for _ in 0..3 {
            broker.set("q", "x").unwrap();
        }
        assert_eq!(broker.count("q").unwrap(), 3);
        for _ in 0..3 {
            assert_eq!(broker.get("q").unwrap(), "x");
        }
        assert!(matches!(
            broker.get("q").unwrap_err(),
            BrokerError::QueueEmpty { .. }
        ));
    }

    #[test]
    fn test_delete_then_recreate() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        broker.set("q", "a").unwrap();
        broker.set("q", "b").unwrap();
        broker.delete("q").unwrap();

        assert!(matches!(
            broker.count("q").unwrap_err(),
            BrokerError::QueueNotFound { .. }
        ));
        assert!(matches!(
            broker.delete("q").unwrap_err(),
            BrokerError::QueueNotFound { .. }
        ));

        broker.set("q", "y").unwrap();
        assert_eq!(broker.count("q").unwrap(), 1);
        assert_eq!(
            fixture.sink.records().last(),
            Some(&RecoveryRecord::set("q", "y"))
        );
    }

    #[test]
    fn test_missing_queue() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        assert!(matches!(
            broker.get("nope").unwrap_err(),
            BrokerError::QueueNotFound { .. }
        ));
        assert!(matches!(
            broker.skip("nope", 1).unwrap_err(),
            BrokerError::QueueNotFound { .. }
        ));
        assert!(fixture.sink.records().is_empty());
    }

    #[test]
    fn test_invalid_input_creates_nothing() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        assert!(matches!(
            broker.set("q", "").unwrap_err(),
            BrokerError::Invalid { .. }
        ));
        assert!(matches!(
            broker.set("a b", "m").unwrap_err(),
            BrokerError::Invalid { .. }
        ));
        assert!(broker.list().is_empty());
    }

    #[test]
    fn test_skip_rotates_without_logging() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;
        for message in ["a", "b", "c"] {
            broker.set("q", message).unwrap();
        }
        let logged = fixture.sink.records().len();

        assert_eq!(broker.skip("q", 2).unwrap(), 2);
        assert_eq!(fixture.sink.records().len(), logged);

        let order: Vec<_> = (0..3).map(|_| broker.get("q").unwrap()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(broker.skip("q", 5).unwrap(), 0);
    }

    #[test]
    fn test_skip_huge_count_moves_remainder() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;
        for message in ["a", "b", "c"] {
            broker.set("q", message).unwrap();
        }

        // 3_000_000_001 % 3 == 1
        assert_eq!(broker.skip("q", 3_000_000_001).unwrap(), 1);
        assert_eq!(broker.skip("q", 3).unwrap(), 0);
        assert!(broker.skip("q", usize::MAX).unwrap() < 3);

        let mut order: Vec<_> = (0..3).map(|_| broker.get("q").unwrap()).collect();
        let rotated = order.iter().position(|m| m == "a").unwrap();
        order.rotate_left(rotated);
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_delete_racing_set_logs_in_memory_order() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        std::thread::scope(|scope| {
            for producer in 0..4 {
                scope.spawn(move || {
                    for i in 0..500 {
                        broker.set("q", format!("p{producer}-{i}")).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..500 {
                    let _ = broker.delete("q");
                    std::thread::yield_now();
                }
            });
        });

        let tally: Tally = fixture.sink.records().into_iter().collect();
        let in_memory = broker
            .count("q")
            .map_or(0, |count| u64::try_from(count).unwrap());
        assert_eq!(tally.total(), in_memory);
    }

    #[test]
    fn test_capacity_without_growth() {
        let fixture = TestFixture::with_config(
            &BrokerConfig::builder()
                .queue_init_size(1)
                .queue_growth(0)
                .build(),
        );
        let broker = &fixture.broker;

        broker.set("q", "a").unwrap();
        let err = broker.set("q", "b").unwrap_err();

        assert!(matches!(err, BrokerError::Capacity { capacity: 1, .. }));
        assert_eq!(fixture.sink.records().len(), 1);
    }

    #[test]
    fn test_backpressure_keeps_set_loses_get() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;

        fixture.sink.reject(true);
        let err = broker.set("q", "a").unwrap_err();
        assert!(matches!(err, BrokerError::DurabilityGap {
            method: Method::Set,
            ..
        }));
        assert_eq!(broker.count("q").unwrap(), 1);

        let err = broker.get("q").unwrap_err();
        assert!(matches!(err, BrokerError::DurabilityGap {
            method: Method::Get,
            ..
        }));
        assert_eq!(broker.count("q").unwrap(), 0);
        assert!(fixture.sink.records().is_empty());
    }

    #[test]
    fn test_fatal_rejects_mutations() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;
        broker.set("q", "a").unwrap();
        fixture.sink.fatal.set("disk gone".to_string()).unwrap();

        assert!(matches!(
            broker.set("q", "b").unwrap_err(),
            BrokerError::Fatal { .. }
        ));
        assert!(matches!(
            broker.get("q").unwrap_err(),
            BrokerError::Fatal { .. }
        ));
        assert!(matches!(
            broker.delete("q").unwrap_err(),
            BrokerError::Fatal { .. }
        ));
        assert_eq!(broker.count("q").unwrap(), 1);
        assert_eq!(broker.list(), vec!["q"]);
    }

    #[test]
    fn test_restore_is_not_logged() {
        let fixture = TestFixture::new();
        let tally: Tally = (0..4).map(|_| RecoveryRecord::set("q", "m")).collect();

        let stats = fixture.broker.restore(&tally);

        assert_eq!(stats.messages, 4);
        assert_eq!(fixture.broker.count("q").unwrap(), 4);
        assert!(fixture.sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_literal_and_unsupported() {
        let fixture = TestFixture::new();
        let broker = &fixture.broker;
        broker.set("q", "plain").unwrap();
        broker.set("q", "mysql:users/1").unwrap();

        let payload = broker.fetch("q").await.unwrap();
        assert_eq!(payload, Payload::literal("plain"));

        let err = broker.fetch("q").await.unwrap_err();
        assert!(matches!(err, BrokerError::Payload {
            source: PayloadError::Unsupported { .. }
        }));
        assert_eq!(broker.count("q").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_download_empty_reference() {
        let fixture = TestFixture::new();
        let err = fixture.broker.download("").await.unwrap_err();
        assert!(matches!(err, BrokerError::Invalid { .. }));
    }
}
