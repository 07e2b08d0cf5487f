//! Relay configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::frame::ErrorCode;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CONSUMER_QUEUE: usize = 64;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        "E_CONFIG"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Outbound frames buffered per consumer before drops start.
    pub consumer_queue: usize,
    /// Per-consumer send timeout. `None` leaves it to the transport.
    pub send_timeout: Option<Duration>,
    pub max_message_bytes: usize,
    /// Echo `MalformedMetadata` diagnostics back to the producer.
    pub echo_errors: bool,
    pub credentials_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            port: DEFAULT_PORT,
            consumer_queue: DEFAULT_CONSUMER_QUEUE,
            send_timeout: Some(Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS)),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            echo_errors: true,
            credentials_file: None,
        }
    }
}

impl RelayConfig {
    /// Build typed relay config from environment variables.
    ///
    /// Optional:
    /// - `BIND_ADDR`: default `0.0.0.0`
    /// - `PORT`: default 3000
    /// - `RELAY_CONSUMER_QUEUE`: default 64
    /// - `RELAY_SEND_TIMEOUT_MS`: default 5000, `0` disables
    /// - `RELAY_MAX_MESSAGE_BYTES`: default 16 MiB
    /// - `RELAY_ECHO_ERRORS`: default `true`
    /// - `RELAY_CREDENTIALS_FILE`: unset means every producer is accepted
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a set variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a present value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = lookup("BIND_ADDR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.bind_addr);
        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let consumer_queue = parse_or(&lookup, "RELAY_CONSUMER_QUEUE", DEFAULT_CONSUMER_QUEUE)?;
        let send_timeout_ms = parse_or(&lookup, "RELAY_SEND_TIMEOUT_MS", DEFAULT_SEND_TIMEOUT_MS)?;
        let max_message_bytes = parse_or(&lookup, "RELAY_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;
        let echo_errors = match lookup("RELAY_ECHO_ERRORS") {
            None => defaults.echo_errors,
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid { key: "RELAY_ECHO_ERRORS", value: raw })?,
        };
        let credentials_file = lookup("RELAY_CREDENTIALS_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        if consumer_queue == 0 {
            return Err(ConfigError::Invalid { key: "RELAY_CONSUMER_QUEUE", value: "0".into() });
        }

        Ok(Self {
            bind_addr,
            port,
            consumer_queue,
            send_timeout: (send_timeout_ms > 0).then(|| Duration::from_millis(send_timeout_ms)),
            max_message_bytes,
            echo_errors,
            credentials_file,
        })
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
