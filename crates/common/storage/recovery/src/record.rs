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

//! Recovery records and their on-disk line format.
//!
//! Every queue mutation is logged as one [`RecoveryRecord`]. A record is
//! rendered as `METHOD QUEUE MESSAGE` joined by single spaces, and the whole
//! line is then query-escaped so that it fits on one line:
//!
//! ```text
//! SET jobs send report      ->  SET+jobs+send+report\n
//! GET jobs file:a/b.txt     ->  GET+jobs+file%3Aa%2Fb.txt\n
//! DEL jobs                  ->  DEL+jobs+\n
//! ```
//!
//! - Unreserved bytes (`A-Z a-z 0-9 - _ . ~`) are kept as-is
//! - A space becomes `+`, every other byte becomes `%XX`
//! - Decoding splits on the first two spaces only, so a message may itself
//!   contain spaces

use std::{borrow::Cow, str::FromStr};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use snafu::{OptionExt, ResultExt, Snafu};

/// Bytes escaped when writing a record line.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Separator between method, queue name, and message.
pub const FIELD_DELIMITER: char = ' ';

/// Operation recorded in the log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    /// A message was pushed onto a queue.
    Set,
    /// A message was popped from a queue.
    Get,
    /// A queue and all of its contents were dropped.
    Del,
}

/// A line of the recovery log could not be decoded.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    #[snafu(display("Record is not valid UTF-8 after unescaping"))]
    Unescape { source: std::str::Utf8Error },

    #[snafu(display("Record has fewer than three fields: {line:?}"))]
    MissingFields { line: String },

    #[snafu(display("Unknown record method {method:?}"))]
    UnknownMethod { method: String },
}

/// One logged queue operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRecord {
    pub method:  Method,
    pub queue:   String,
    /// Empty for [`Method::Del`].
    pub message: String,
}

impl RecoveryRecord {
    pub fn set(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method:  Method::Set,
            queue:   queue.into(),
            message: message.into(),
        }
    }

    pub fn get(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            method:  Method::Get,
            queue:   queue.into(),
            message: message.into(),
        }
    }

    pub fn delete(queue: impl Into<String>) -> Self {
        Self {
            method:  Method::Del,
            queue:   queue.into(),
            message: String::new(),
        }
    }

    /// Render the escaped line, without the trailing newline.
    #[must_use]
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}",
            self.method, self.queue, self.message
        );
        // '%' is itself escaped, so "%20" in the output can only be a space.
        utf8_percent_encode(&raw, QUERY_ESCAPE)
            .to_string()
            .replace("%20", "+")
    }

    /// Render the escaped line including its terminating newline.
    #[must_use]
    pub fn encode_line(&self) -> String {
        let mut line = self.encode();
        line.push('\n');
        line
    }

    /// Decode one escaped line (with or without a trailing newline).
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let unplussed = line.replace('+', " ");
        let raw: Cow<'_, str> = percent_decode_str(&unplussed)
            .decode_utf8()
            .context(UnescapeSnafu)?;

        let mut parts = raw.splitn(3, FIELD_DELIMITER);
        let (Some(method), Some(queue), Some(message)) = (parts.next(), parts.next(), parts.next())
        else {
            return MissingFieldsSnafu {
                line: raw.to_string(),
            }
            .fail();
        };

        let method = Method::from_str(method).ok().context(UnknownMethodSnafu {
            method: method.to_string(),
        })?;

        Ok(Self {
            method,
            queue: queue.to_string(),
            message: message.to_string(),
        })
    }
}
