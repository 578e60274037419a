//! The `config` module loads client settings and turns them into the
//! runtime `ClientConfig`.
//!
//! Settings come from an optional `config/default.{toml,yaml,json}` file
//! and `CCPUBSUB_*` environment variables, layered over built-in defaults.

mod settings;

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::connection::Backoff;

pub use settings::{
    ConnectionSettings, KeepaliveSettings, LoggingSettings, PartialSettings, ProtocolSettings,
    ReconnectSettings, RequestSettings, Settings,
};

/// Loads the configuration from `config/default` and environment variables,
/// merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(Path::new("config"))
}

/// Like `load_config`, reading `default.*` from `dir`.
pub fn load_config_from(dir: &Path) -> Result<Settings, ConfigError> {
    let file = dir.join("default");
    let builder = Config::builder()
        .add_source(File::with_name(&file.to_string_lossy()).required(false))
        .add_source(
            Environment::with_prefix("CCPUBSUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

/// Runtime parameters of a `PubSubClient`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub backoff: Backoff,
    /// Reconnect after a live session is lost.
    pub auto_reconnect: bool,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// Used by `request` and subscribe acks when no explicit timeout is given.
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_protocol_errors: u32,
    pub event_log_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "wss://pubsub.crowdcontrol.live/".to_string(),
            headers: Vec::new(),
            backoff: Backoff::default(),
            auto_reconnect: true,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            max_protocol_errors: 16,
            event_log_limit: 100,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_protocol_errors(mut self, max: u32) -> Self {
        self.max_protocol_errors = max;
        self
    }

    pub fn with_event_log_limit(mut self, limit: usize) -> Self {
        self.event_log_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests;
