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

//! Application configuration.
//!
//! Values are layered, later sources winning:
//!
//! 1. [`AppConfig::default`]
//! 2. the file passed to [`AppConfig::load`] (TOML, JSON or YAML by
//!    extension)
//! 3. `LMQ__`-prefixed environment variables, `__` separating sections
//!
//! ```toml
//! [http]
//! bind_addresses = ["0.0.0.0:3000", "[::]:3000"]
//! enable_gzip = true
//! ip_allow_list = ["127.0.0.1"]
//!
//! [broker]
//! queue_init_size = 1000
//! file_base_path = "/srv/lmq/files"
//!
//! [recovery]
//! dir = "/var/lib/lmq/recovery"
//! segment_records = 100000
//! segment_bytes = 67108864
//! flush = { mode = "batch", bytes = 65536, interval_ms = 100 }
//! ```
//!
//! `LMQ__HTTP__ENABLE_GZIP=true` or
//! `LMQ__HTTP__BIND_ADDRESSES=0.0.0.0:80,0.0.0.0:8080` override the file.

use std::{path::{Path, PathBuf}, time::Duration};

use bon::Builder;
use config::{Config, ConfigError, Environment, File};
use lmq_broker::BrokerConfig;
use lmq_common_storage_recovery::{
    FlushMode, RecoveryConfig, RollStrategy,
    config::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_SEGMENT_RECORDS},
};
use lmq_common_telemetry::logging::LoggingOptions;
use lmq_server::http::RestServerConfig;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Prefix of environment overrides, e.g. `LMQ__BROKER__QUEUE_GROWTH`.
pub const ENV_PREFIX: &str = "LMQ";
const ENV_SEPARATOR: &str = "__";

/// Configuration for the application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct AppConfig {
    #[builder(default)]
    pub logging:                  LoggingOptions,
    /// REST server configuration
    #[builder(default)]
    pub http:                     RestServerConfig,
    #[builder(default)]
    pub broker:                   BrokerConfig,
    #[builder(default)]
    pub recovery:                 RecoverySettings,
    /// Whether to stop on Ctrl+C / SIGTERM
    #[default = true]
    #[builder(default = true)]
    pub enable_graceful_shutdown: bool,
}

/// Recovery log settings as they appear in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct RecoverySettings {
    #[default(PathBuf::from("./recovery"))]
    #[builder(default = PathBuf::from("./recovery"), into)]
    pub dir:                  PathBuf,
    /// Records per segment, for both the writer and compaction.
    #[default(DEFAULT_SEGMENT_RECORDS)]
    #[builder(default = DEFAULT_SEGMENT_RECORDS)]
    pub segment_records:      u64,
    /// Also roll once a segment holds this many bytes.
    pub segment_bytes:        Option<u64>,
    /// Also roll once a segment has been open this many seconds. Ignored by
    /// compaction.
    pub segment_max_age_secs: Option<u64>,
    /// Records that may wait for the writer before sets and gets fail.
    #[default(DEFAULT_CHANNEL_CAPACITY)]
    #[builder(default = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity:     usize,
    #[builder(default)]
    pub flush:                FlushPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FlushPolicy {
    #[default]
    Async,
    Sync,
    Batch { bytes: usize, interval_ms: u64 },
}

impl From<FlushPolicy> for FlushMode {
    fn from(policy: FlushPolicy) -> Self {
        match policy {
            FlushPolicy::Async => Self::Async,
            FlushPolicy::Sync => Self::Sync,
            FlushPolicy::Batch { bytes, interval_ms } => Self::Batch {
                bytes,
                interval: Duration::from_millis(interval_ms),
            },
        }
    }
}

impl RecoverySettings {
    /// Roll on the record limit, or on whichever configured limit is hit
    /// first.
    #[must_use]
    pub fn roll_strategy(&self) -> RollStrategy {
        let by_count = RollStrategy::ByCount(self.segment_records);
        if self.segment_bytes.is_none() && self.segment_max_age_secs.is_none() {
            return by_count;
        }

        let mut strategies = vec![by_count];
        strategies.extend(self.segment_bytes.map(RollStrategy::BySize));
        strategies.extend(
            self.segment_max_age_secs
                .map(|secs| RollStrategy::ByTime(Duration::from_secs(secs))),
        );
        RollStrategy::Combined(strategies)
    }

    #[must_use]
    pub fn to_recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            dir:              self.dir.clone(),
            roll_strategy:    self.roll_strategy(),
            flush_mode:       self.flush.into(),
            channel_capacity: self.channel_capacity,
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` if given, then `LMQ__*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Fails if `path` does not exist or any source does not parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder.add_source(env).build()?.try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("http.bind_addresses")
        .with_list_parse_key("http.ip_allow_list")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        env_source().source(Some(vars))
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = AppConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.http.bind_addresses, vec!["127.0.0.1:3000"]);
    }

    #[test]
    fn test_file_then_env() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lmq.toml");
        std::fs::write(
            &path,
            r#"
[http]
bind_addresses = ["0.0.0.0:3000", "0.0.0.0:3001"]
enable_gzip = true

[broker]
queue_init_size = 10

[recovery]
dir = "/var/lib/lmq"
segment_records = 500
flush = { mode = "batch", bytes = 4096, interval_ms = 50 }
"#,
        )
        .unwrap();

        let config = AppConfig::load_with_env(
            Some(&path),
            env(&[
                ("LMQ__BROKER__QUEUE_INIT_SIZE", "20"),
                ("LMQ__HTTP__IP_ALLOW_LIST", "127.0.0.1,10.0.0.1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.http.bind_addresses.len(), 2);
        assert!(config.http.enable_gzip);
        assert_eq!(config.http.ip_allow_list, vec!["127.0.0.1", "10.0.0.1"]);
        assert_eq!(config.broker.queue_init_size, 20);
        assert_eq!(config.recovery.dir, PathBuf::from("/var/lib/lmq"));
        assert_eq!(config.recovery.flush, FlushPolicy::Batch {
            bytes:       4096,
            interval_ms: 50,
        });

        let recovery = config.recovery.to_recovery_config();
        assert!(matches!(recovery.roll_strategy, RollStrategy::ByCount(500)));
        assert!(matches!(recovery.flush_mode, FlushMode::Batch { bytes: 4096, .. }));
    }

    #[test]
    fn test_roll_strategy_combines_limits() {
        let settings = RecoverySettings::builder().segment_records(10).build();
        assert!(matches!(settings.roll_strategy(), RollStrategy::ByCount(10)));

        let settings = RecoverySettings::builder()
            .segment_records(10)
            .segment_bytes(1024)
            .segment_max_age_secs(60)
            .build();
        let strategy = settings.roll_strategy();
        assert!(matches!(&strategy, RollStrategy::Combined(limits) if limits.len() == 3));
        assert!(!strategy.should_roll(100, Duration::from_secs(1), 1));
        assert!(strategy.should_roll(1024, Duration::ZERO, 1));
        assert!(strategy.should_roll(0, Duration::from_secs(60), 1));
        assert!(strategy.should_roll(0, Duration::ZERO, 10));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.toml");
        assert!(AppConfig::load_with_env(Some(&path), env(&[])).is_err());
    }
}
