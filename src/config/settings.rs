use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::config::ClientConfig;
use crate::connection::Backoff;

/// Top-level configuration settings for the client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub reconnect: ReconnectSettings,
    pub keepalive: KeepaliveSettings,
    pub request: RequestSettings,
    pub protocol: ProtocolSettings,
    pub logging: LoggingSettings,
}

/// Where to connect and with which identity.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub url: String,
    pub token: Option<String>,
    pub key: Option<String>,
    /// Extra headers sent with the WebSocket upgrade request.
    pub headers: HashMap<String, String>,
}

/// Reconnect backoff. `max_attempts = 0` retries forever.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub enabled: bool,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KeepaliveSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RequestSettings {
    pub default_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProtocolSettings {
    /// Consecutive undecodable or unexpected envelopes tolerated before the
    /// session is dropped.
    pub max_protocol_errors: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub connection: Option<PartialConnectionSettings>,
    pub reconnect: Option<PartialReconnectSettings>,
    pub keepalive: Option<PartialKeepaliveSettings>,
    pub request: Option<PartialRequestSettings>,
    pub protocol: Option<PartialProtocolSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialConnectionSettings {
    pub url: Option<String>,
    pub token: Option<String>,
    pub key: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialReconnectSettings {
    pub enabled: Option<bool>,
    pub base_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialKeepaliveSettings {
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRequestSettings {
    pub default_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialProtocolSettings {
    pub max_protocol_errors: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay whatever was provided on top of `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let connection = self.connection.unwrap_or_default();
        let reconnect = self.reconnect.unwrap_or_default();
        let keepalive = self.keepalive.unwrap_or_default();
        let request = self.request.unwrap_or_default();
        let protocol = self.protocol.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            connection: ConnectionSettings {
                url: connection.url.unwrap_or(default.connection.url),
                token: connection.token.or(default.connection.token),
                key: connection.key.or(default.connection.key),
                headers: connection.headers.unwrap_or(default.connection.headers),
            },
            reconnect: ReconnectSettings {
                enabled: reconnect.enabled.unwrap_or(default.reconnect.enabled),
                base_delay_ms: reconnect
                    .base_delay_ms
                    .unwrap_or(default.reconnect.base_delay_ms),
                multiplier: reconnect.multiplier.unwrap_or(default.reconnect.multiplier),
                max_delay_ms: reconnect
                    .max_delay_ms
                    .unwrap_or(default.reconnect.max_delay_ms),
                jitter_ms: reconnect.jitter_ms.unwrap_or(default.reconnect.jitter_ms),
                max_attempts: reconnect
                    .max_attempts
                    .unwrap_or(default.reconnect.max_attempts),
            },
            keepalive: KeepaliveSettings {
                interval_secs: keepalive
                    .interval_secs
                    .unwrap_or(default.keepalive.interval_secs),
                timeout_secs: keepalive
                    .timeout_secs
                    .unwrap_or(default.keepalive.timeout_secs),
            },
            request: RequestSettings {
                default_timeout_ms: request
                    .default_timeout_ms
                    .unwrap_or(default.request.default_timeout_ms),
                handshake_timeout_ms: request
                    .handshake_timeout_ms
                    .unwrap_or(default.request.handshake_timeout_ms),
            },
            protocol: ProtocolSettings {
                max_protocol_errors: protocol
                    .max_protocol_errors
                    .unwrap_or(default.protocol.max_protocol_errors),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings {
                url: "wss://pubsub.crowdcontrol.live/".to_string(),
                token: None,
                key: None,
                headers: HashMap::new(),
            },
            reconnect: ReconnectSettings {
                enabled: true,
                base_delay_ms: 1_000,
                multiplier: 2.0,
                max_delay_ms: 30_000,
                jitter_ms: 250,
                max_attempts: 0,
            },
            keepalive: KeepaliveSettings {
                interval_secs: 30,
                timeout_secs: 10,
            },
            request: RequestSettings {
                default_timeout_ms: 10_000,
                handshake_timeout_ms: 10_000,
            },
            protocol: ProtocolSettings {
                max_protocol_errors: 16,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Runtime client configuration derived from these settings.
    pub fn client_config(&self) -> ClientConfig {
        let mut headers: Vec<(String, String)> = self
            .connection
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.sort();

        ClientConfig {
            url: self.connection.url.clone(),
            headers,
            backoff: Backoff {
                base: Duration::from_millis(self.reconnect.base_delay_ms),
                multiplier: self.reconnect.multiplier,
                max: Duration::from_millis(self.reconnect.max_delay_ms),
                jitter: Duration::from_millis(self.reconnect.jitter_ms),
                max_attempts: (self.reconnect.max_attempts > 0)
                    .then_some(self.reconnect.max_attempts),
            },
            auto_reconnect: self.reconnect.enabled,
            keepalive_interval: Duration::from_secs(self.keepalive.interval_secs),
            keepalive_timeout: Duration::from_secs(self.keepalive.timeout_secs),
            request_timeout: Duration::from_millis(self.request.default_timeout_ms),
            handshake_timeout: Duration::from_millis(self.request.handshake_timeout_ms),
            max_protocol_errors: self.protocol.max_protocol_errors,
            ..ClientConfig::default()
        }
    }
}
