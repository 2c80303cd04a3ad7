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

use std::any::Any;

use axum::response::{IntoResponse, Response};
use lmq_broker::BrokerError;
use lmq_error::{ErrorExt, StackError, StatusCode};
use snafu::Snafu;
use strum::EnumProperty;
use tracing::{error, warn};

/// Body of every 5xx response.
pub const INTERNAL_ERROR_BODY: &str = "Internal server error!";

#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum ApiError {
    #[snafu(display("{reason}"))]
    #[strum(props(status_code = "invalid_argument"))]
    InvalidArgument { reason: String },

    #[snafu(display("Permission denied!"))]
    #[strum(props(status_code = "forbidden"))]
    Forbidden,

    #[snafu(transparent)]
    Broker { source: BrokerError },
}

impl ErrorExt for ApiError {
    fn status_code(&self) -> StatusCode {
        if let Self::Broker { source } = self {
            return source.status_code();
        }
        self.get_str("status_code")
            .and_then(|value| value.parse().ok())
            .unwrap_or(StatusCode::Unknown)
    }

    fn as_any(&self) -> &dyn Any { self as _ }
}

impl StackError for ApiError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}"));
        if let Self::Broker { source } = self {
            source.debug_fmt(layer + 1, buf);
        }
    }

    fn next(&self) -> Option<&dyn StackError> {
        match self {
            Self::Broker { source } => Some(source),
            _ => None,
        }
    }

    fn transparent(&self) -> bool { matches!(self, Self::Broker { .. }) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = if code.is_server_error() {
            let mut stack = Vec::new();
            self.debug_fmt(0, &mut stack);
            error!(code = %code, error = ?stack, "Request failed");
            INTERNAL_ERROR_BODY.to_string()
        } else {
            warn!(code = %code, error = %self, "Request rejected");
            self.to_string()
        };
        (code.http_status(), body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
