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


use std::sync::Arc;

use lmq_broker::{Broker, BrokerConfig, BrokerError};
use lmq_common_storage_recovery::{RecoveryLog, RecoveryLogBuilder, RollStrategy, compact};
use tempfile::TempDir;

struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        lmq_common_telemetry::logging::init_default_ut_logging();
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("files")).unwrap();
        Self { temp_dir }
    }

    /// Open the log in `recovery/`, refill a broker and hand both back.
    fn open(&self) -> (RecoveryLog, Broker) {
        let (log, replay) = RecoveryLogBuilder::new(self.temp_dir.path().join("recovery"))
            .segment_records(4)
            .build()
            .unwrap();
        let config = BrokerConfig::builder()
            .queue_init_size(2)
            .queue_growth(2)
            .file_base_path(self.temp_dir.path().join("files"))
            .build();
        let broker = Broker::new(&config, Arc::new(log.create_appender().unwrap()));
        broker.restore(&replay.tally);
        (log, broker)
    }
}

#[test]
fn test_restart_restores_unconsumed_sets() {
    let fixture = TestFixture::new();

    {
        let (log, broker) = fixture.open();
        for i in 0..10 {
            broker.set("q", format!("m{i}")).unwrap();
        }
        log.shutdown().unwrap();
    }

    let (log, broker) = fixture.open();
    assert_eq!(broker.count("q").unwrap(), 10);
    assert_eq!(broker.get("q").unwrap(), "m0");
    log.shutdown().unwrap();
}

#[test]
fn test_restart_after_get_and_delete() {
    let fixture = TestFixture::new();

    {
        let (log, broker) = fixture.open();
        broker.set("keep", "a").unwrap();
        broker.set("keep", "b").unwrap();
        assert_eq!(broker.get("keep").unwrap(), "a");
        broker.set("drop", "x").unwrap();
        broker.delete("drop").unwrap();
        log.shutdown().unwrap();
    }

    let (log, broker) = fixture.open();
    assert_eq!(broker.list(), vec!["keep"]);
    assert_eq!(broker.get("keep").unwrap(), "b");
    assert!(matches!(
        broker.count("drop").unwrap_err(),
        BrokerError::QueueNotFound { .. }
    ));
    log.shutdown().unwrap();
}

#[test]
fn test_compaction_between_restarts() {
    let fixture = TestFixture::new();
    let recovery_dir = fixture.temp_dir.path().join("recovery");

    {
        let (log, broker) = fixture.open();
        for i in 0..9 {
            broker.set("q", format!("m{}", i % 3)).unwrap();
        }
        broker.get("q").unwrap();
        log.shutdown().unwrap();
    }

    let report = compact(&recovery_dir, &RollStrategy::ByCount(4)).unwrap();
    assert!(report.segments_compacted > 0);

    let (log, broker) = fixture.open();
    assert_eq!(broker.count("q").unwrap(), 8);
    log.shutdown().unwrap();
}

#[tokio::test]
async fn test_fetch_file_reference() {
    let fixture = TestFixture::new();
    std::fs::write(fixture.temp_dir.path().join("files/report.txt"), b"quarterly").unwrap();

    let (log, broker) = fixture.open();
    broker.publish("q", "file:report.txt").await.unwrap();

    let err = broker.publish("q", "file:missing.txt").await.unwrap_err();
    assert!(err.to_string().contains("File not exists!"));

    let payload = broker.fetch("q").await.unwrap();
    assert_eq!(&payload.bytes[..], b"quarterly");
    assert_eq!(payload.reference.as_deref(), Some("file:report.txt"));

    let payload = broker.download("file:report.txt").await.unwrap();
    assert_eq!(&payload.bytes[..], b"quarterly");
    log.shutdown().unwrap();
}

#[test]
fn test_concurrent_set_and_delete_replay_matches_memory() {
    let fixture = TestFixture::new();
    let recovery_dir = fixture.temp_dir.path().join("recovery");

    let (log, _) = RecoveryLogBuilder::new(&recovery_dir)
        .segment_records(64)
        .channel_capacity(100_000)
        .build()
        .unwrap();
    let broker = Broker::new(
        &BrokerConfig::builder().queue_init_size(2).build(),
        Arc::new(log.create_appender().unwrap()),
    );

    std::thread::scope(|scope| {
        for producer in 0..4 {
            let broker = &broker;
            scope.spawn(move || {
                for i in 0..500 {
                    broker.set("q", format!("p{producer}-{i}")).unwrap();
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..200 {
                let _ = broker.delete("q");
                std::thread::yield_now();
            }
        });
    });

    let in_memory = broker.count("q").unwrap_or_default();
    log.shutdown().unwrap();

    let (log, replay) = RecoveryLogBuilder::new(&recovery_dir).build().unwrap();
    assert_eq!(replay.tally.total(), u64::try_from(in_memory).unwrap());
    log.shutdown().unwrap();
}
