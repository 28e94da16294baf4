//! Session configuration.
//!
//! All fields have defaults; `Config` deserializes from the usual
//! camelCase option names with durations given in (fractional) seconds:
//!
//! ```
//! let config: muxwire::Config =
//!     serde_json::from_str(r#"{ "enableKeepAlive": false, "connectionWriteTimeout": 0.5 }"#)
//!         .unwrap();
//! assert!(!config.enable_keep_alive);
//! assert_eq!(config.accept_backlog, 256);
//! ```
//!
//! Diagnostics go through `tracing`; install a subscriber to see them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::protocol::INITIAL_STREAM_WINDOW;

/// Default maximum number of streams admitted before inbound SYNs are reset.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 256;

/// Default interval between keepalive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for transport writes, ping replies and blocked stream writes.
pub const DEFAULT_CONNECTION_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum per-stream receive window.
pub const DEFAULT_MAX_STREAM_WINDOW_SIZE: u32 = INITIAL_STREAM_WINDOW;

/// Tuning knobs for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Maximum number of streams in the table; further inbound SYNs get RST.
    pub accept_backlog: usize,
    /// Send periodic pings and close the session when one goes unanswered.
    pub enable_keep_alive: bool,
    /// Interval between keepalive pings.
    #[serde(with = "duration_secs")]
    pub keep_alive_interval: Duration,
    /// Bound on transport writes, ping round trips and blocked stream writes.
    #[serde(with = "duration_secs")]
    pub connection_write_timeout: Duration,
    /// Largest receive window a stream will advertise.
    pub max_stream_window_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accept_backlog: DEFAULT_ACCEPT_BACKLOG,
            enable_keep_alive: true,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            connection_write_timeout: DEFAULT_CONNECTION_WRITE_TIMEOUT,
            max_stream_window_size: DEFAULT_MAX_STREAM_WINDOW_SIZE,
        }
    }
}

impl Config {
    /// Set the accept backlog.
    ///
    /// Default: 256
    pub fn with_accept_backlog(mut self, backlog: usize) -> Self {
        self.accept_backlog = backlog;
        self
    }

    /// Enable or disable keepalive pings.
    ///
    /// Default: enabled
    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.enable_keep_alive = enabled;
        self
    }

    /// Set the keepalive interval.
    ///
    /// Default: 30 seconds
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the connection write timeout.
    ///
    /// Default: 10 seconds
    pub fn with_connection_write_timeout(mut self, timeout: Duration) -> Self {
        self.connection_write_timeout = timeout;
        self
    }

    /// Set the maximum stream window.
    ///
    /// Default: 256 KiB
    pub fn with_max_stream_window_size(mut self, size: u32) -> Self {
        self.max_stream_window_size = size;
        self
    }

    /// Check the configuration for values the session cannot run with.
    pub fn verify(&self) -> Result<()> {
        if self.accept_backlog == 0 {
            return Err(MuxError::InvalidConfig(
                "backlog must be positive".to_string(),
            ));
        }
        if self.enable_keep_alive && self.keep_alive_interval.is_zero() {
            return Err(MuxError::InvalidConfig(
                "keep-alive interval must be positive".to_string(),
            ));
        }
        if self.connection_write_timeout.is_zero() {
            return Err(MuxError::InvalidConfig(
                "connection write timeout must be positive".to_string(),
            ));
        }
        if self.max_stream_window_size < INITIAL_STREAM_WINDOW {
            return Err(MuxError::InvalidConfig(format!(
                "max stream window must be at least {} bytes",
                INITIAL_STREAM_WINDOW
            )));
        }
        Ok(())
    }
}

/// Serde adapter: `Duration` as floating-point seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.accept_backlog, 256);
        assert!(config.enable_keep_alive);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(config.connection_write_timeout, Duration::from_secs(10));
        assert_eq!(config.max_stream_window_size, 256 * 1024);
        assert!(config.verify().is_ok());
    }

    #[test]
    fn test_config_chaining() {
        let config = Config::default()
            .with_accept_backlog(1000)
            .with_keep_alive(false)
            .with_keep_alive_interval(Duration::from_millis(100))
            .with_connection_write_timeout(Duration::from_millis(500))
            .with_max_stream_window_size(1024 * 1024);

        assert_eq!(config.accept_backlog, 1000);
        assert!(!config.enable_keep_alive);
        assert_eq!(config.keep_alive_interval, Duration::from_millis(100));
        assert_eq!(config.connection_write_timeout, Duration::from_millis(500));
        assert_eq!(config.max_stream_window_size, 1024 * 1024);
    }

    #[test]
    fn test_verify_rejects_bad_values() {
        assert!(Config::default().with_accept_backlog(0).verify().is_err());
        assert!(Config::default()
            .with_keep_alive_interval(Duration::ZERO)
            .verify()
            .is_err());
        assert!(Config::default()
            .with_keep_alive(false)
            .with_keep_alive_interval(Duration::ZERO)
            .verify()
            .is_ok());
        let err = Config::default()
            .with_max_stream_window_size(1024)
            .verify()
            .unwrap_err();
        assert!(err.to_string().contains("max stream window"));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{ "acceptBacklog": 4, "keepAliveInterval": 0.1, "maxStreamWindowSize": 524288 }"#,
        )
        .unwrap();

        assert_eq!(config.accept_backlog, 4);
        assert_eq!(config.keep_alive_interval, Duration::from_millis(100));
        assert_eq!(config.max_stream_window_size, 524_288);
        assert_eq!(config.connection_write_timeout, DEFAULT_CONNECTION_WRITE_TIMEOUT);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default().with_connection_write_timeout(Duration::from_millis(250));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"connectionWriteTimeout\":0.25"));

        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_deserialize_negative_duration_fails() {
        let result: std::result::Result<Config, _> =
            serde_json::from_str(r#"{ "keepAliveInterval": -1 }"#);
        assert!(result.is_err());
    }
}
