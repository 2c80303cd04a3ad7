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

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use lmq_broker::{Broker, BrokerConfig};
use lmq_common_storage_recovery::{RecoveryLog, RecoveryLogBuilder};
use lmq_server::{
    http::{RestServerConfig, build_router, start_rest_server},
    routes::{MESSAGE_HEADER, queue_routes},
};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestFixture {
    temp_dir: TempDir,
    log:      Option<RecoveryLog>,
    broker:   Arc<Broker>,
}

impl TestFixture {
    fn new() -> Self {
        lmq_common_telemetry::logging::init_default_ut_logging();

        let temp_dir = TempDir::new().unwrap();
        let files = temp_dir.path().join("files");
        std::fs::create_dir(&files).unwrap();
        std::fs::write(files.join("hello.txt"), b"hello from disk").unwrap();

        let (log, _) = RecoveryLogBuilder::new(temp_dir.path().join("recovery"))
            .build()
            .unwrap();
        let config = BrokerConfig::builder()
            .queue_init_size(2)
            .file_base_path(files)
            .build();
        let broker = Arc::new(Broker::new(
            &config,
            Arc::new(log.create_appender().unwrap()),
        ));

        Self {
            temp_dir,
            log: Some(log),
            broker,
        }
    }

    fn router(&self) -> Router {
        build_router(&RestServerConfig::default(), &[queue_routes(
            self.broker.clone(),
        )])
        .unwrap()
    }

    /// Send `GET uri` and return status, `Message` header and body.
    async fn call(&self, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = self
            .router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let message = response
            .headers()
            .get(MESSAGE_HEADER)
            .map(|value| value.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, message, String::from_utf8_lossy(&body).into_owned())
    }

    async fn expect(&self, uri: &str, status: StatusCode, body: &str) {
        let (actual_status, _, actual_body) = self.call(uri).await;
        assert_eq!(
            (actual_status, actual_body.as_str()),
            (status, body),
            "GET {uri}"
        );
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            let _ = log.shutdown();
        }
    }
}

#[tokio::test]
async fn test_set_count_get() {
    let fixture = TestFixture::new();

    fixture.expect("/set/jobs/a", StatusCode::OK, "OK.").await;
    fixture.expect("/count/jobs", StatusCode::OK, "1").await;
    fixture.expect("/get/jobs", StatusCode::OK, "a").await;
    fixture
        .expect("/get/jobs", StatusCode::GONE, "Queue is empty!")
        .await;
}

#[tokio::test]
async fn test_repeated_payload() {
    let fixture = TestFixture::new();

    for _ in 0..3 {
        fixture.expect("/set/q/x", StatusCode::OK, "OK.").await;
    }
    fixture.expect("/count/q", StatusCode::OK, "3").await;
    for _ in 0..3 {
        fixture.expect("/get/q", StatusCode::OK, "x").await;
    }
    fixture
        .expect("/get/q", StatusCode::GONE, "Queue is empty!")
        .await;
}

#[tokio::test]
async fn test_delete_and_recreate() {
    let fixture = TestFixture::new();

    fixture.expect("/set/q/a", StatusCode::OK, "OK.").await;
    fixture.expect("/delete/q", StatusCode::OK, "OK.").await;
    fixture
        .expect("/count/q", StatusCode::NOT_FOUND, "Queue not exists!")
        .await;
    fixture
        .expect("/delete/q", StatusCode::NOT_FOUND, "Queue not exists!")
        .await;
    fixture.expect("/set/q/y", StatusCode::OK, "OK.").await;
    fixture.expect("/count/q", StatusCode::OK, "1").await;
}

#[tokio::test]
async fn test_list_and_messages_with_slashes() {
    let fixture = TestFixture::new();

    fixture.expect("/set/b/one/two", StatusCode::OK, "OK.").await;
    fixture
        .expect("/set/a/hello%20world", StatusCode::OK, "OK.")
        .await;
    fixture.expect("/list", StatusCode::OK, "a\nb\n").await;
    fixture.expect("/get/b", StatusCode::OK, "one/two").await;
    fixture.expect("/get/a", StatusCode::OK, "hello world").await;
}

#[tokio::test]
async fn test_bad_requests() {
    let fixture = TestFixture::new();

    fixture
        .expect("/set/q/", StatusCode::BAD_REQUEST, "Message is empty!")
        .await;
    fixture
        .expect("/count/q", StatusCode::NOT_FOUND, "Queue not exists!")
        .await;
    fixture
        .expect("/download/", StatusCode::BAD_REQUEST, "Message is empty!")
        .await;
    fixture
        .expect("/skip/q/1", StatusCode::NOT_FOUND, "Queue not exists!")
        .await;

    fixture.expect("/set/q/a", StatusCode::OK, "OK.").await;
    fixture
        .expect(
            "/skip/q/many",
            StatusCode::BAD_REQUEST,
            "Number must be a integer!",
        )
        .await;
}

#[tokio::test]
async fn test_skip_rotates_front() {
    let fixture = TestFixture::new();

    for message in ["a", "b", "c"] {
        fixture
            .expect(&format!("/set/q/{message}"), StatusCode::OK, "OK.")
            .await;
    }
    fixture.expect("/skip/q/1", StatusCode::OK, "OK.").await;
    fixture.expect("/get/q", StatusCode::OK, "b").await;
    fixture.expect("/skip/q/-3", StatusCode::OK, "OK.").await;
    fixture.expect("/get/q", StatusCode::OK, "c").await;
}

#[tokio::test]
async fn test_fetch_and_download_payloads() {
    let fixture = TestFixture::new();

    fixture
        .expect(
            "/set/q/file:missing.txt",
            StatusCode::NOT_ACCEPTABLE,
            "File not exists!",
        )
        .await;
    fixture
        .expect("/set/q/file:hello.txt", StatusCode::OK, "OK.")
        .await;
    fixture.expect("/set/q/plain", StatusCode::OK, "OK.").await;

    let (status, header, body) = fixture.call("/fetch/q").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header.as_deref(), Some("file:hello.txt"));
    assert_eq!(body, "hello from disk");

    let (status, header, body) = fixture.call("/fetch/q").await;
    assert_eq!(status, StatusCode::OK);
    assert!(header.is_none());
    assert_eq!(body, "plain");

    fixture
        .expect("/fetch/q", StatusCode::GONE, "Queue is empty!")
        .await;
    fixture
        .expect("/download/file:hello.txt", StatusCode::OK, "hello from disk")
        .await;
    fixture
        .expect(
            "/download/file:nope.txt",
            StatusCode::NOT_FOUND,
            "File not found!",
        )
        .await;
    fixture
        .expect("/download/just%20text", StatusCode::OK, "just text")
        .await;

    let (status, ..) = fixture.call("/download/mysql:users/1").await;
    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_help_version_health() {
    let fixture = TestFixture::new();

    let (status, _, body) = fixture.call("/help").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("Methods:"));

    let (status, _, body) = fixture.call("/version").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(env!("CARGO_PKG_VERSION")));

    let (status, ..) = fixture.call("/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_served_over_tcp() {
    let fixture = TestFixture::new();
    let config = RestServerConfig::builder()
        .bind_addresses(vec!["127.0.0.1:0".to_string()])
        .ip_allow_list(vec!["127.0.0.1".to_string()])
        .build();

    let mut handler = start_rest_server(config, vec![queue_routes(fixture.broker.clone())])
        .await
        .unwrap();
    handler.wait_for_start().await.unwrap();
    let addr = handler.local_addrs()[0];

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/set/remote/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("http://{addr}/get/remote"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "ping");

    handler.shutdown();
    handler.wait_for_stop().await.unwrap();
    assert!(fixture.temp_dir.path().join("recovery").is_dir());
}
