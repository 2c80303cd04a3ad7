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


//! HTTP transport for the lmq broker.
//!
//! [`http::start_rest_server`] binds every configured address and serves one
//! shared router; [`routes::queue_routes`] maps the queue operations onto
//! `GET` routes with plain-text bodies.

pub mod error;
pub mod http;
pub mod routes;

use std::net::SocketAddr;

use futures::future::join_all;
use snafu::Snafu;
use tokio::{sync::oneshot::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum NetworkError {
    #[snafu(display("Failed to bind {addr}"))]
    Bind {
        addr:   SocketAddr,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse address {addr}"))]
    ParseAddress {
        addr:   String,
        #[snafu(source)]
        source: std::net::AddrParseError,
    },

    #[snafu(display("No bind address configured"))]
    NoBindAddress,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Handle for managing a running HTTP service.
///
/// One server task runs per bound address; all of them share a cancellation
/// token, so a single [`shutdown`](Self::shutdown) stops every listener.
pub struct ServiceHandler {
    /// One task per bound address
    join_handles:       Vec<JoinHandle<()>>,
    /// Token for signalling shutdown
    cancellation_token: CancellationToken,
    /// Start notifications, one per task
    started_rx:         Vec<Receiver<()>>,
    /// Addresses actually bound, in configuration order
    local_addrs:        Vec<SocketAddr>,
}

impl ServiceHandler {
    /// Waits until every listener is accepting connections.
    ///
    /// Calling it again returns immediately.
    pub async fn wait_for_start(&mut self) -> Result<()> {
        for rx in self.started_rx.drain(..) {
            // A dropped sender means the task already ended; nothing to wait for.
            let _ = rx.await;
        }
        Ok(())
    }

    /// Waits for every server task to finish. Use after
    /// [`shutdown`](Self::shutdown).
    pub async fn wait_for_stop(self) -> Result<()> {
        join_all(self.join_handles).await;
        Ok(())
    }

    /// Signals graceful shutdown without waiting for it.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }

    /// Whether every server task has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool { self.join_handles.iter().all(JoinHandle::is_finished) }

    /// Bound addresses, with ephemeral ports resolved.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] { &self.local_addrs }
}
