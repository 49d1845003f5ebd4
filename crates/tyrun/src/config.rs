//! Server and client tuning, loadable from TOML.
//!
//! ```toml
//! [server]
//! max_batch_size = 50
//! max_payload_bytes = 1048576
//! call_timeout_ms = 30000
//!
//! [client]
//! batch_window_ms = 2
//! max_batch_size = 50
//! call_timeout_ms = 30000
//! ```
//!
//! Every key is optional; missing keys take the defaults above.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Largest batch answered. Larger batches fail every member with `PAYLOAD_TOO_LARGE`.
    pub max_batch_size: usize,
    /// Largest inbound payload accepted, in bytes.
    pub max_payload_bytes: usize,
    /// Upper bound on a single call, including guards and the handler.
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_payload_bytes: 1024 * 1024,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        nonzero("server.max_batch_size", self.max_batch_size as u128)?;
        nonzero("server.max_payload_bytes", self.max_payload_bytes as u128)?;
        nonzero("server.call_timeout_ms", self.call_timeout.as_millis())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// How long a batching link waits for more calls after the first one.
    #[serde(rename = "batch_window_ms", with = "millis")]
    pub batch_window: Duration,
    pub max_batch_size: usize,
    /// How long a caller waits for its result before giving up with `TIMEOUT`.
    #[serde(rename = "call_timeout_ms", with = "millis")]
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(2),
            max_batch_size: 50,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        nonzero("client.max_batch_size", self.max_batch_size as u128)?;
        nonzero("client.call_timeout_ms", self.call_timeout.as_millis())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.server.validate()?;
        config.client.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

fn nonzero(key: &str, value: u128) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{} must be greater than zero", key)));
    }
    Ok(())
}

mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
