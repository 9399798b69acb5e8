//! Streams configuration
//!
//! Loaded either from YAML or from flat `streams.*` properties:
//!
//! ```text
//! streams.sink.topic.cdc.sourceId=users;orders
//! streams.sink.topic.cdc.sourceId.idName=sourceId
//! streams.sink.topic.cdc.sourceId.labelName=SourceEvent
//! streams.sink.topic.cdc.schema=products
//! streams.check.systemdb.wait.timeout=10000
//! streams.source.schema.polling.interval=300000
//! streams.source.schema.availability.wait=5000
//! ```

use crate::sink::{CdcStrategy, KeyStrategy, DEFAULT_ID_NAME, DEFAULT_LABEL_NAME};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;

pub const SOURCE_ID_TOPICS: &str = "streams.sink.topic.cdc.sourceId";
pub const SOURCE_ID_ID_NAME: &str = "streams.sink.topic.cdc.sourceId.idName";
pub const SOURCE_ID_LABEL_NAME: &str = "streams.sink.topic.cdc.sourceId.labelName";
pub const SCHEMA_TOPICS: &str = "streams.sink.topic.cdc.schema";
pub const SCHEMA_KEY_STRATEGY: &str = "streams.sink.topic.cdc.schema.keyStrategy";
pub const SYSTEM_DB_WAIT_TIMEOUT: &str = "streams.check.systemdb.wait.timeout";
pub const SCHEMA_POLLING_INTERVAL: &str = "streams.source.schema.polling.interval";
pub const SCHEMA_AVAILABILITY_WAIT: &str = "streams.source.schema.availability.wait";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Source-id CDC topics and their synthetic identity names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceIdConfig {
    pub topics: Vec<String>,
    pub id_name: String,
    pub label_name: String,
}

impl Default for SourceIdConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            id_name: DEFAULT_ID_NAME.to_string(),
            label_name: DEFAULT_LABEL_NAME.to_string(),
        }
    }
}

/// Schema CDC topics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub topics: Vec<String>,
    pub key_strategy: KeyStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub source_id: SourceIdConfig,
    pub schema: SchemaConfig,
}

/// Complete streams configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub sink: SinkConfig,
    /// How long `available()` waits for the system database, in ms
    pub system_db_wait_timeout_ms: u64,
    /// Time between constraint polls, in ms
    pub schema_polling_interval_ms: u64,
    /// How long a constraint poll waits for the database, in ms
    pub schema_availability_wait_ms: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            system_db_wait_timeout_ms: 10_000,
            schema_polling_interval_ms: 300_000,
            schema_availability_wait_ms: 5_000,
        }
    }
}

fn split_topics(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

fn parse_millis(key: &str, value: &str) -> ConfigResult<u64> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl StreamsConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from flat `streams.*` properties. Unknown keys are ignored.
    pub fn from_properties(properties: &HashMap<String, String>) -> ConfigResult<Self> {
        let mut config = Self::default();
        for (key, value) in properties {
            match key.as_str() {
                SOURCE_ID_TOPICS => config.sink.source_id.topics = split_topics(value),
                SOURCE_ID_ID_NAME => config.sink.source_id.id_name = value.trim().to_string(),
                SOURCE_ID_LABEL_NAME => config.sink.source_id.label_name = value.trim().to_string(),
                SCHEMA_TOPICS => config.sink.schema.topics = split_topics(value),
                SCHEMA_KEY_STRATEGY => {
                    config.sink.schema.key_strategy = match value.trim().to_ascii_lowercase().as_str() {
                        "default" => KeyStrategy::Default,
                        "all" => KeyStrategy::All,
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                key: key.clone(),
                                value: value.clone(),
                            })
                        }
                    }
                }
                SYSTEM_DB_WAIT_TIMEOUT => config.system_db_wait_timeout_ms = parse_millis(key, value)?,
                SCHEMA_POLLING_INTERVAL => config.schema_polling_interval_ms = parse_millis(key, value)?,
                SCHEMA_AVAILABILITY_WAIT => config.schema_availability_wait_ms = parse_millis(key, value)?,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse `key=value` lines; blank lines and `#` comments are skipped
    pub fn from_properties_str(text: &str) -> ConfigResult<Self> {
        let mut properties = HashMap::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: line.to_string(),
                value: String::new(),
            })?;
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self::from_properties(&properties)
    }

    /// Reject empty identity names and topics claimed by both CDC modes
    pub fn validate(&self) -> ConfigResult<()> {
        let source_id = &self.sink.source_id;
        if source_id.id_name.trim().is_empty() {
            return Err(ConfigError::Invalid("source id property name is empty".to_string()));
        }
        if source_id.label_name.trim().is_empty() {
            return Err(ConfigError::Invalid("source id label name is empty".to_string()));
        }
        if self.schema_polling_interval_ms == 0 {
            return Err(ConfigError::Invalid("schema polling interval must be positive".to_string()));
        }

        let source_topics: BTreeSet<&str> = source_id.topics.iter().map(String::as_str).collect();
        let both: Vec<&str> = self
            .sink
            .schema
            .topics
            .iter()
            .map(String::as_str)
            .filter(|t| source_topics.contains(t))
            .collect();
        if !both.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "topics configured for both source id and schema CDC: {}",
                both.join(", ")
            )));
        }
        Ok(())
    }

    /// CDC strategy for `topic`, `None` when the topic is not a CDC topic
    pub fn strategy_for(&self, topic: &str) -> Option<CdcStrategy> {
        let sink = &self.sink;
        if sink.source_id.topics.iter().any(|t| t == topic) {
            Some(CdcStrategy::source_id(
                sink.source_id.id_name.as_str(),
                sink.source_id.label_name.as_str(),
            ))
        } else if sink.schema.topics.iter().any(|t| t == topic) {
            Some(CdcStrategy::schema(sink.schema.key_strategy))
        } else {
            None
        }
    }

    pub fn system_db_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.system_db_wait_timeout_ms)
    }

    pub fn schema_polling_interval(&self) -> Duration {
        Duration::from_millis(self.schema_polling_interval_ms)
    }

    pub fn schema_availability_wait(&self) -> Duration {
        Duration::from_millis(self.schema_availability_wait_ms)
    }
}
