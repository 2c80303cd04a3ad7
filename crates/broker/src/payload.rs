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

//! Resolution of queued messages into response payloads.
//!
//! A message is either a literal string or a reference `scheme:locator`.
//! Queues never look inside messages; only `fetch` and `download` hand them
//! to a [`PayloadResolver`].
//!
//! | message              | resolves to                              |
//! |----------------------|------------------------------------------|
//! | `hello`              | `hello` as `text/plain`                  |
//! | `file:img/a.png`     | bytes of `{file_base_path}/img/a.png`    |
//! | `mysql:users/42`     | `Unsupported`, no relational backend     |
//! | `note:anything`      | the whole string, unknown scheme         |

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::error::{
    PathEscapeSnafu, PayloadError, PayloadIoSnafu, PayloadMissingSnafu, PayloadNotFoundSnafu,
    UnsupportedSnafu,
};

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes served for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes:        Bytes,
    pub content_type: String,
    /// The original message when it was a reference rather than a literal.
    pub reference:    Option<String>,
}

impl Payload {
    #[must_use]
    pub fn literal(message: &str) -> Self {
        Self {
            bytes:        Bytes::copy_from_slice(message.as_bytes()),
            content_type: TEXT_CONTENT_TYPE.to_string(),
            reference:    None,
        }
    }
}

/// A message split into its scheme and locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    File(&'a str),
    Record(&'a str),
    Literal(&'a str),
}

impl<'a> Reference<'a> {
    #[must_use]
    pub fn parse(message: &'a str) -> Self {
        match message.split_once(':') {
            Some(("file", locator)) => Self::File(locator),
            Some(("mysql", locator)) => Self::Record(locator),
            _ => Self::Literal(message),
        }
    }
}

#[async_trait]
pub trait PayloadResolver: Send + Sync {
    /// Turn a message into the bytes returned to a consumer.
    async fn resolve(&self, message: &str) -> Result<Payload, PayloadError>;

    /// Validate a message before it is accepted into a queue.
    async fn check(&self, _message: &str) -> Result<(), PayloadError> { Ok(()) }
}

/// Resolves `file:` references under a base directory and literals as
/// themselves.
#[derive(Debug, Clone)]
pub struct FileResolver {
    base: PathBuf,
}

impl FileResolver {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self { Self { base: base.into() } }

    /// Join `locator` onto the base directory, refusing absolute paths and
    /// parent components.
    fn locate(&self, locator: &str) -> Result<PathBuf, PayloadError> {
        let relative = Path::new(locator);
        ensure!(
            !locator.is_empty()
                && relative
                    .components()
                    .all(|component| matches!(component, Component::Normal(_) | Component::CurDir)),
            PathEscapeSnafu { locator }
        );
        Ok(self.base.join(relative))
    }
}

#[async_trait]
impl PayloadResolver for FileResolver {
    async fn resolve(&self, message: &str) -> Result<Payload, PayloadError> {
        match Reference::parse(message) {
            Reference::Literal(literal) => Ok(Payload::literal(literal)),
            Reference::Record(_) => UnsupportedSnafu { scheme: "mysql" }.fail(),
            Reference::File(locator) => {
                let path = self.locate(locator)?;
                let bytes = match tokio::fs::read(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return PayloadNotFoundSnafu { reference: message }.fail();
                    }
                    Err(e) => return Err(e).context(PayloadIoSnafu { path }),
                };
                debug!(path = ?path, size = bytes.len(), "Payload file read");

                Ok(Payload {
                    content_type: sniff_content_type(&bytes).to_string(),
                    bytes:        Bytes::from(bytes),
                    reference:    Some(message.to_string()),
                })
            }
        }
    }

    async fn check(&self, message: &str) -> Result<(), PayloadError> {
        match Reference::parse(message) {
            Reference::Literal(_) => Ok(()),
            Reference::Record(_) => UnsupportedSnafu { scheme: "mysql" }.fail(),
            Reference::File(locator) => {
                let path = self.locate(locator)?;
                let exists = tokio::fs::try_exists(&path)
                    .await
                    .context(PayloadIoSnafu { path })?;
                ensure!(exists, PayloadMissingSnafu { reference: message });
                Ok(())
            }
        }
    }
}

/// Signatures checked in order; the first prefix match wins.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"RIFF", "audio/wave"),
    (b"OggS", "application/ogg"),
    (b"<?xml", "text/xml; charset=utf-8"),
];

/// Guess a content type from the leading bytes of a payload.
#[must_use]
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(512)];
    let trimmed = head.trim_ascii_start();

    if let Some(content_type) = SIGNATURES.iter().find_map(|&(signature, content_type)| {
        (head.starts_with(signature) || trimmed.starts_with(signature)).then_some(content_type)
    }) {
        return content_type;
    }
    if trimmed.len() >= 5 && trimmed[..5].eq_ignore_ascii_case(b"<html") {
        return "text/html; charset=utf-8";
    }
    if std::str::from_utf8(head).is_ok() || std::str::from_utf8(bytes).is_ok() {
        return TEXT_CONTENT_TYPE;
    }
    BINARY_CONTENT_TYPE
}
