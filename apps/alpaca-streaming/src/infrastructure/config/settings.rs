//! Client Configuration Settings
//!
//! `StreamConfig` tunes one session. `ClientConfig` is everything the binary
//! reads from the environment. Parsing goes through a lookup function so it
//! can be exercised without touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::streaming::StreamEndpoint;
use crate::infrastructure::alpaca::auth::{AUTH_TIMEOUT, Credentials};

/// Per-session connection and recovery settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Reconnect after a transport failure instead of ending `run()`.
    pub auto_reconnect: bool,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_base: Duration,
    /// Upper bound on any reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Interval between keepalive pings (0 = no pings).
    pub keepalive_interval: Duration,
    /// Time allowed for a pong before the connection is considered dead.
    pub keepalive_timeout: Duration,
    /// Time allowed for connect plus authentication.
    pub handshake_timeout: Duration,
    /// Time allowed for a subscription acknowledgement.
    pub ack_timeout: Duration,
    /// Symmetric jitter applied to each reconnection delay, as a fraction.
    pub reconnect_jitter: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_delay_base: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(60),
            max_reconnect_attempts: 10,
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            handshake_timeout: AUTH_TIMEOUT,
            ack_timeout: Duration::from_secs(5),
            reconnect_jitter: 0.0,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Primary stream.
    pub endpoint: StreamEndpoint,
    /// Trade updates stream to run alongside the primary one, if any.
    pub trade_updates: Option<StreamEndpoint>,
    /// Session settings shared by every stream.
    pub stream: StreamConfig,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = required(&lookup, "ALPACA_API_KEY", "ALPACA_KEY")?;
        let secret = required(&lookup, "ALPACA_API_SECRET", "ALPACA_SECRET")?;
        let credentials = Credentials::new(key, secret)?;

        let endpoint = match lookup("ALPACA_STREAM") {
            Some(value) => StreamEndpoint::from_str_case_insensitive(&value)
                .ok_or_else(|| ConfigError::invalid("ALPACA_STREAM", &value))?,
            None => StreamEndpoint::default(),
        };

        let trade_updates = match lookup("ALPACA_TRADE_UPDATES") {
            Some(value) => parse_trade_updates(&value)?,
            None => None,
        };

        let defaults = StreamConfig::default();
        let stream = StreamConfig {
            auto_reconnect: parse_bool(
                &lookup,
                "ALPACA_STREAM_AUTO_RECONNECT",
                defaults.auto_reconnect,
            )?,
            reconnect_delay_base: parse_duration_millis(
                &lookup,
                "ALPACA_STREAM_RECONNECT_DELAY_MS",
                defaults.reconnect_delay_base,
            )?,
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "ALPACA_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            )?,
            max_reconnect_attempts: parse_number(
                &lookup,
                "ALPACA_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            keepalive_interval: parse_duration_secs(
                &lookup,
                "ALPACA_STREAM_KEEPALIVE_INTERVAL_SECS",
                defaults.keepalive_interval,
            )?,
            keepalive_timeout: parse_duration_secs(
                &lookup,
                "ALPACA_STREAM_KEEPALIVE_TIMEOUT_SECS",
                defaults.keepalive_timeout,
            )?,
            ..defaults
        };

        let metrics_port = parse_number(&lookup, "ALPACA_STREAM_METRICS_PORT", 0)?;

        Ok(Self {
            credentials,
            endpoint,
            trade_updates,
            stream,
            metrics_port,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable does not parse.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Credentials were rejected before use.
    #[error(transparent)]
    Credentials(#[from] crate::infrastructure::alpaca::auth::AuthError),
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

fn required<F>(lookup: &F, primary: &str, fallback: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (key, value) = lookup(primary)
        .map(|v| (primary, v))
        .or_else(|| lookup(fallback).map(|v| (fallback, v)))
        .ok_or_else(|| ConfigError::MissingEnvVar(primary.to_string()))?;

    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }

    Ok(value)
}

fn parse_trade_updates(value: &str) -> Result<Option<StreamEndpoint>, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "" | "off" | "none" | "false" => Ok(None),
        "paper" => Ok(Some(StreamEndpoint::PaperTrading)),
        "live" => Ok(Some(StreamEndpoint::LiveTrading)),
        _ => Err(ConfigError::invalid("ALPACA_TRADE_UPDATES", value)),
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key).map_or(Ok(default), |v| {
        v.trim().parse().map_err(|_| ConfigError::invalid(key, &v))
    })
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(Ok(default), |v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, &v)),
    })
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(Ok(default), |v| {
        v.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::invalid(key, &v))
    })
}

fn parse_duration_millis<F>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(Ok(default), |v| {
        v.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::invalid(key, &v))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDS: [(&str, &str); 2] = [("ALPACA_API_KEY", "PKTEST"), ("ALPACA_API_SECRET", "shh")];

    #[test]
    fn stream_config_defaults() {
        let config = StreamConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay_base, Duration::from_secs(1));
        assert_eq!(config.reconnect_delay_max, Duration::from_secs(60));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.keepalive_timeout, Duration::from_secs(10));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config = config_from(&CREDS).unwrap();
        assert_eq!(config.credentials.key(), "PKTEST");
        assert_eq!(config.endpoint, StreamEndpoint::Iex);
        assert_eq!(config.trade_updates, None);
        assert_eq!(config.stream, StreamConfig::default());
        assert_eq!(config.metrics_port, 0);
    }

    #[test]
    fn legacy_credential_names_are_accepted() {
        let config = config_from(&[("ALPACA_KEY", "PKOLD"), ("ALPACA_SECRET", "shh")]).unwrap();
        assert_eq!(config.credentials.key(), "PKOLD");
    }

    #[test]
    fn missing_and_empty_credentials() {
        assert!(matches!(
            config_from(&[("ALPACA_API_SECRET", "shh")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "ALPACA_API_KEY"
        ));
        assert!(matches!(
            config_from(&[("ALPACA_API_KEY", " "), ("ALPACA_API_SECRET", "shh")]),
            Err(ConfigError::EmptyValue(key)) if key == "ALPACA_API_KEY"
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = CREDS.to_vec();
        pairs.extend([
            ("ALPACA_STREAM", "SIP"),
            ("ALPACA_TRADE_UPDATES", "paper"),
            ("ALPACA_STREAM_AUTO_RECONNECT", "off"),
            ("ALPACA_STREAM_RECONNECT_DELAY_MS", "250"),
            ("ALPACA_STREAM_RECONNECT_DELAY_MAX_SECS", "5"),
            ("ALPACA_STREAM_MAX_RECONNECT_ATTEMPTS", "0"),
            ("ALPACA_STREAM_KEEPALIVE_INTERVAL_SECS", "15"),
            ("ALPACA_STREAM_KEEPALIVE_TIMEOUT_SECS", "3"),
            ("ALPACA_STREAM_METRICS_PORT", "9464"),
        ]);

        let config = config_from(&pairs).unwrap();
        assert_eq!(config.endpoint, StreamEndpoint::Sip);
        assert_eq!(config.trade_updates, Some(StreamEndpoint::PaperTrading));
        assert!(!config.stream.auto_reconnect);
        assert_eq!(config.stream.reconnect_delay_base, Duration::from_millis(250));
        assert_eq!(config.stream.reconnect_delay_max, Duration::from_secs(5));
        assert_eq!(config.stream.max_reconnect_attempts, 0);
        assert_eq!(config.stream.keepalive_interval, Duration::from_secs(15));
        assert_eq!(config.stream.keepalive_timeout, Duration::from_secs(3));
        assert_eq!(config.metrics_port, 9464);
    }

    #[test]
    fn invalid_values_are_reported() {
        for (key, value) in [
            ("ALPACA_STREAM", "nasdaq"),
            ("ALPACA_TRADE_UPDATES", "sometimes"),
            ("ALPACA_STREAM_AUTO_RECONNECT", "maybe"),
            ("ALPACA_STREAM_MAX_RECONNECT_ATTEMPTS", "-1"),
        ] {
            let mut pairs = CREDS.to_vec();
            pairs.push((key, value));
            match config_from(&pairs) {
                Err(ConfigError::InvalidValue { key: k, value: v }) => {
                    assert_eq!(k, key);
                    assert_eq!(v, value);
                }
                other => panic!("expected InvalidValue for {key}, got {other:?}"),
            }
        }
    }
}
