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


//! Named in-memory queues made durable by the recovery log.
//!
//! [`Broker`] owns a [`QueueRegistry`] of [`GrowableQueue`]s and a
//! [`RecordSink`], normally a
//! [`RecoveryAppender`](lmq_common_storage_recovery::RecoveryAppender). At
//! startup the registry is refilled from the replayed log with
//! [`Broker::restore`] before any request is served.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod payload;
pub mod registry;

pub use buffer::GrowableQueue;
pub use config::BrokerConfig;
pub use engine::{Broker, RecordSink};
pub use error::{BrokerError, PayloadError, Result};
pub use payload::{FileResolver, Payload, PayloadResolver};
pub use registry::{QueueRegistry, RestoreStats};
