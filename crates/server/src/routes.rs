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

//! Queue routes.
//!
//! Every route is a `GET` with a plain-text body:
//!
//! | route                      | success body                  |
//! |----------------------------|-------------------------------|
//! | `/list`                    | queue names, one per line     |
//! | `/count/{queue}`           | decimal count                 |
//! | `/skip/{queue}/{number}`   | `OK.`                         |
//! | `/set/{queue}/{*message}`  | `OK.`                         |
//! | `/get/{queue}`             | the message                   |
//! | `/fetch/{queue}`           | resolved payload              |
//! | `/download/{*message}`     | resolved payload              |
//! | `/delete/{queue}`          | `OK.`                         |
//!
//! Payloads resolved from a reference carry the reference in the `Message`
//! header.
//!
//! `/set` validates the queue name and message before touching the registry,
//! so a rejected request such as `/set/q/` does not leave an empty `q`
//! behind.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use lmq_broker::{Broker, Payload};
use tracing::warn;

use crate::error::{ApiResult, InvalidArgumentSnafu};

/// Header carrying the original reference of a resolved payload.
pub const MESSAGE_HEADER: HeaderName = HeaderName::from_static("message");

const OK_BODY: &str = "OK.";
const EMPTY_MESSAGE: &str = "Message is empty!";
const NOT_A_NUMBER: &str = "Number must be a integer!";

const HELP: &str = "Methods:
/list                   List of the queues.
/count/:queue           Number of messages in a queue.
/skip/:queue/:number    Skip messages in the queue.
/set/:queue/:message    Set a message in the queue.
/get/:queue             Get a message in the queue.
/fetch/:queue           Fetch a message with content in a queue.
/download/:message      Download content of the message.
/delete/:queue          Delete the queue.
";

/// Route handler registering the queue routes on a router.
pub fn queue_routes(broker: Arc<Broker>) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    move |router: Router| router.merge(queue_router(broker.clone()))
}

pub fn queue_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/list", get(list))
        .route("/count/{queue}", get(count))
        .route("/skip/{queue}/{number}", get(skip))
        .route("/set/{queue}", get(empty_message))
        .route("/set/{queue}/", get(empty_message))
        .route("/set/{queue}/{*message}", get(set))
        .route("/get/{queue}", get(get_message))
        .route("/fetch/{queue}", get(fetch))
        .route("/download", get(empty_message))
        .route("/download/", get(empty_message))
        .route("/download/{*message}", get(download))
        .route("/delete/{queue}", get(delete))
        .route("/help", get(help))
        .route("/version", get(version))
        .with_state(broker)
}

async fn list(State(broker): State<Arc<Broker>>) -> String {
    broker.list().into_iter().map(|name| name + "\n").collect()
}

async fn count(
    State(broker): State<Arc<Broker>>,
    Path(queue): Path<String>,
) -> ApiResult<String> {
    Ok(broker.count(&queue)?.to_string())
}

async fn skip(
    State(broker): State<Arc<Broker>>,
    Path((queue, number)): Path<(String, String)>,
) -> ApiResult<&'static str> {
    broker.count(&queue)?;
    let number: i64 = number.parse().map_err(|_| {
        InvalidArgumentSnafu {
            reason: NOT_A_NUMBER,
        }
        .build()
    })?;
    broker.skip(&queue, usize::try_from(number).unwrap_or_default())?;
    Ok(OK_BODY)
}

async fn set(
    State(broker): State<Arc<Broker>>,
    Path((queue, message)): Path<(String, String)>,
) -> ApiResult<&'static str> {
    broker.publish(&queue, &message).await?;
    Ok(OK_BODY)
}

async fn empty_message() -> ApiResult<&'static str> {
    InvalidArgumentSnafu {
        reason: EMPTY_MESSAGE,
    }
    .fail()
}

async fn get_message(
    State(broker): State<Arc<Broker>>,
    Path(queue): Path<String>,
) -> ApiResult<String> {
    Ok(broker.get(&queue)?)
}

async fn fetch(State(broker): State<Arc<Broker>>, Path(queue): Path<String>) -> ApiResult<Response> {
    Ok(payload_response(broker.fetch(&queue).await?))
}

async fn download(
    State(broker): State<Arc<Broker>>,
    Path(message): Path<String>,
) -> ApiResult<Response> {
    Ok(payload_response(broker.download(&message).await?))
}

async fn delete(
    State(broker): State<Arc<Broker>>,
    Path(queue): Path<String>,
) -> ApiResult<&'static str> {
    broker.delete(&queue)?;
    Ok(OK_BODY)
}

async fn help() -> &'static str { HELP }

async fn version() -> String {
    format!(
        "Lightweight Message Queue, version {}",
        env!("CARGO_PKG_VERSION")
    )
}

fn payload_response(payload: Payload) -> Response {
    let Payload {
        bytes,
        content_type,
        reference,
    } = payload;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        bytes,
    )
        .into_response();

    if let Some(reference) = reference {
        match HeaderValue::from_str(&reference) {
            Ok(value) => {
                response.headers_mut().insert(MESSAGE_HEADER, value);
            }
            Err(e) => warn!(reference, error = %e, "Reference is not a valid header value"),
        }
    }
    response
}
