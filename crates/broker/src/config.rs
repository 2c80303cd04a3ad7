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

use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Default number of messages a new queue can hold before it grows.
pub const DEFAULT_QUEUE_INIT_SIZE: usize = 1000;

/// Queue sizing and payload lookup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct BrokerConfig {
    /// Capacity of a freshly created queue.
    #[default(DEFAULT_QUEUE_INIT_SIZE)]
    #[builder(default = DEFAULT_QUEUE_INIT_SIZE)]
    pub queue_init_size: usize,

    /// Slots added each time a queue fills up. Zero fixes the capacity.
    #[default(DEFAULT_QUEUE_INIT_SIZE)]
    #[builder(default = DEFAULT_QUEUE_INIT_SIZE)]
    pub queue_growth: usize,

    /// Directory `file:` references are resolved against.
    #[default(PathBuf::from("./files"))]
    #[builder(default = PathBuf::from("./files"), into)]
    pub file_base_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_matches_default() {
        assert_eq!(BrokerConfig::builder().build(), BrokerConfig::default());
    }

    #[test]
    fn test_partial_deserialize() {
        let config: BrokerConfig = serde_json::from_str(r#"{"queue_growth": 0}"#).unwrap();
        assert_eq!(config.queue_growth, 0);
        assert_eq!(config.queue_init_size, DEFAULT_QUEUE_INIT_SIZE);
    }
}
