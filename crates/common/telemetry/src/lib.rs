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

//! # Telemetry
//!
//! - **[`logging`]**: stdout and rolling-file logging with text or JSON
//!   output and a runtime-reloadable level filter
//! - **[`panic_hook`]**: panics logged as structured events with backtraces
//!   and counted in a Prometheus counter
//!
//! ```rust,no_run
//! use lmq_common_telemetry::{logging::init_tracing_subscriber, panic_hook::set_panic_hook};
//!
//! let _guards = init_tracing_subscriber("lmq");
//! set_panic_hook();
//!
//! tracing::info!("Broker started");
//! ```

pub mod logging;
pub mod panic_hook;
