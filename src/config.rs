use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted session timeout, one week.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    /// Only topics starting with this prefix may be streamed or listed.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
    /// Capacity of the channel between the partition reader and the session.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Config {
    /// Loads configuration from an optional TOML file overlaid with
    /// `WSLOG_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("WSLOG")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.kafka.brokers = normalize_brokers(config.kafka.brokers.iter().map(String::as_str));
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.is_empty() {
            return Err(Error::config("kafka.brokers must not be empty"));
        }
        if self.session.queue_capacity == 0 {
            return Err(Error::config("session.queue_capacity must be positive"));
        }
        if self.kafka.channel_capacity == 0 {
            return Err(Error::config("kafka.channel_capacity must be positive"));
        }
        let timeouts = [
            ("session.write_timeout_secs", self.session.write_timeout_secs),
            ("session.pong_wait_secs", self.session.pong_wait_secs),
            ("session.max_lifetime_secs", self.session.max_lifetime_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(Error::config(format!(
                    "{} must be between 1 and {}",
                    name, MAX_TIMEOUT_SECS
                )));
            }
        }
        Ok(())
    }

    /// Whether `topic` may be served: at least three characters and starting
    /// with the configured prefix.
    pub fn is_log_topic(&self, topic: &str) -> bool {
        topic.len() >= 3 && topic.starts_with(&self.server.topic_prefix)
    }
}

impl KafkaConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

impl SessionConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Probes go out at 9/10 of the acknowledgment window so a healthy peer
    /// always answers before the window closes.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

/// Splits comma separated broker lists and trims every entry.
pub fn normalize_brokers<'a>(entries: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    entries
        .into_iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|broker| !broker.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout_secs: default_write_timeout_secs(),
            pong_wait_secs: default_pong_wait_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_topic_prefix() -> String {
    "log".to_string()
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "wslog_server".to_string()
}

fn default_metadata_timeout_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1
}

fn default_write_timeout_secs() -> u64 {
    10
}

fn default_pong_wait_secs() -> u64 {
    10
}

fn default_max_lifetime_secs() -> u64 {
    30 * 60
}

fn default_queue_capacity() -> usize {
    256
}
