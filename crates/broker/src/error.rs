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

use std::{any::Any, path::PathBuf};

use lmq_common_storage_recovery::{Method, RecoveryError};
use lmq_error::{ErrorExt, StackError, StatusCode};
use snafu::Snafu;
use strum::EnumProperty;

/// Failures while turning a message into the bytes served to a consumer.
#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum PayloadError {
    #[snafu(display("File not found!"))]
    #[strum(props(status_code = "not_found"))]
    PayloadNotFound { reference: String },

    /// A published message references a file that does not exist.
    #[snafu(display("File not exists!"))]
    #[strum(props(status_code = "not_acceptable"))]
    PayloadMissing { reference: String },

    #[snafu(display("Payload scheme {scheme:?} is not supported!"))]
    #[strum(props(status_code = "not_acceptable"))]
    Unsupported { scheme: String },

    #[snafu(display("File reference {locator:?} escapes the base directory!"))]
    #[strum(props(status_code = "invalid_argument"))]
    PathEscape { locator: String },

    #[snafu(display("Failed to read payload {}", path.display()))]
    #[strum(props(status_code = "internal"))]
    PayloadIo {
        path:   PathBuf,
        source: std::io::Error,
    },
}

impl ErrorExt for PayloadError {
    fn status_code(&self) -> StatusCode {
        self.get_str("status_code")
            .and_then(|value| value.parse().ok())
            .unwrap_or(StatusCode::Unknown)
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for PayloadError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}"));
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum BrokerError {
    #[snafu(display("Queue not exists!"))]
    #[strum(props(status_code = "not_found"))]
    QueueNotFound { queue: String },

    /// Expected state, not a fault: the queue exists but holds nothing.
    #[snafu(display("Queue is empty!"))]
    #[strum(props(status_code = "exhausted"))]
    QueueEmpty { queue: String },

    #[snafu(display("{reason}"))]
    #[strum(props(status_code = "invalid_argument"))]
    Invalid { reason: String },

    #[snafu(display("Queue {queue} is full ({capacity} messages)"))]
    #[strum(props(status_code = "unavailable"))]
    Capacity { queue: String, capacity: usize },

    /// The in-memory mutation was applied but its record was not logged.
    #[snafu(display("{method} on queue {queue} was applied but not logged"))]
    #[strum(props(status_code = "storage_unavailable"))]
    DurabilityGap {
        queue:  String,
        method: Method,
        source: RecoveryError,
    },

    #[snafu(display("Recovery writer has stopped: {reason}"))]
    #[strum(props(status_code = "unavailable"))]
    Fatal { reason: String },

    #[snafu(transparent)]
    Payload { source: PayloadError },
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        if let Self::Payload { source } = self {
            return source.status_code();
        }
        self.get_str("status_code")
            .and_then(|value| value.parse().ok())
            .unwrap_or(StatusCode::Unknown)
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for BrokerError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}"));
        if let Self::Payload { source } = self {
            source.debug_fmt(layer + 1, buf);
        }
    }

    fn next(&self) -> Option<&dyn StackError> {
        match self {
            Self::Payload { source } => Some(source),
            _ => None,
        }
    }

    fn transparent(&self) -> bool { matches!(self, Self::Payload { .. }) }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
