//! Client configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! overrides. Durations are written in milliseconds (`*_ms` keys).

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use tidewire_protocol::constants::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use tidewire_protocol::{ConnectionDetails, WireFormat};

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// What a channel does when the connection comes back without continuity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LostContinuity {
    /// Re-attach quietly.
    #[default]
    Reattach,
    /// Re-attach and report an "unable to recover" error on every channel.
    Surface,
}

/// Backoff policy for reconnect attempts from `disconnected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Random spread applied to each delay, as a fraction (0.25 = ±25%).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let spread = capped * self.jitter.clamp(0.0, 1.0);
        let offset: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_secs_f64((capped + spread * offset).max(0.05))
    }
}

/// Options for a realtime client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// WebSocket endpoint of the service.
    pub endpoint: String,
    /// Identity to publish under, if the credentials allow choosing one.
    pub client_id: Option<String>,
    pub format: WireFormat,
    /// Connect as soon as the client is constructed.
    pub auto_connect: bool,
    /// Bound on connect, attach and detach round trips.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub realtime_request_timeout: Duration,
    #[serde(rename = "close_timeout_ms", with = "duration_ms")]
    pub close_timeout: Duration,
    /// Idle window used until the service advertises its heartbeat interval.
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,
    pub disconnected_retry: ReconnectConfig,
    #[serde(rename = "suspended_retry_ms", with = "duration_ms")]
    pub suspended_retry_timeout: Duration,
    /// How long a disconnected connection may keep retrying before it is
    /// suspended, unless the service advertises its own value.
    #[serde(rename = "connection_state_ttl_ms", with = "duration_ms")]
    pub connection_state_ttl: Duration,
    /// Consecutive failed attempts after which the connection is suspended.
    pub max_disconnected_retries: u32,
    #[serde(rename = "channel_retry_ms", with = "duration_ms")]
    pub channel_retry_timeout: Duration,
    /// Limits used until the service advertises its own.
    pub max_message_size: usize,
    pub max_frame_size: usize,
    pub lost_continuity: LostContinuity,
    /// File caching resumption data across restarts.
    pub resume_store_path: Option<PathBuf>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/realtime".into(),
            client_id: None,
            format: WireFormat::Json,
            auto_connect: true,
            realtime_request_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(25),
            disconnected_retry: ReconnectConfig::default(),
            suspended_retry_timeout: Duration::from_secs(30),
            connection_state_ttl: Duration::from_secs(120),
            max_disconnected_retries: 10,
            channel_retry_timeout: Duration::from_secs(15),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            lost_continuity: LostContinuity::Reattach,
            resume_store_path: None,
        }
    }
}

impl ClientOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Parses options from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let options = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "client options loaded");
        Ok(options)
    }

    /// Idle window: the service's heartbeat interval plus the request
    /// timeout when advertised, otherwise the configured idle timeout.
    pub fn idle_window(&self, details: &ConnectionDetails) -> Duration {
        details
            .max_idle_interval
            .map(|ms| Duration::from_millis(ms) + self.realtime_request_timeout)
            .unwrap_or(self.idle_timeout)
    }

    pub fn state_ttl(&self, details: &ConnectionDetails) -> Duration {
        details
            .connection_state_ttl
            .map(Duration::from_millis)
            .unwrap_or(self.connection_state_ttl)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(15));
        assert!((config.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reconnect_config_delay_backoff() {
        let config = ReconnectConfig::default();
        // Base delays: 250ms, 500ms, 1s, 2s, 4s, 8s, 15s (capped), 15s...
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let delay = config.delay_for_attempt((i + 1) as u32);
            let secs = delay.as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn reconnect_delay_without_jitter_is_exact() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            backoff_factor: 2.0,
            jitter: 0.0,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(60), Duration::from_secs(4));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let options = ClientOptions::from_toml_str(
            r#"
            endpoint = "wss://example.test/realtime"
            format = "msgpack"
            request_timeout_ms = 2500
            lost_continuity = "surface"

            [disconnected_retry]
            initial_delay_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(options.endpoint, "wss://example.test/realtime");
        assert_eq!(options.format, WireFormat::MsgPack);
        assert_eq!(options.realtime_request_timeout, Duration::from_millis(2500));
        assert_eq!(options.lost_continuity, LostContinuity::Surface);
        assert_eq!(
            options.disconnected_retry.initial_delay,
            Duration::from_millis(100)
        );
        assert_eq!(options.disconnected_retry.max_delay, Duration::from_secs(15));
        assert!(options.auto_connect);
        assert_eq!(options.max_disconnected_retries, 10);
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("client.toml");
        std::fs::write(&path, "client_id = \"alice\"\nauto_connect = false\n").unwrap();

        let options = ClientOptions::load(&path).unwrap();
        assert_eq!(options.client_id.as_deref(), Some("alice"));
        assert!(!options.auto_connect);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let result = ClientOptions::load(Path::new("/nonexistent/tidewire.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn idle_window_prefers_advertised_interval() {
        let options = ClientOptions::default();
        let mut details = ConnectionDetails::default();
        assert_eq!(options.idle_window(&details), options.idle_timeout);

        details.max_idle_interval = Some(15_000);
        assert_eq!(
            options.idle_window(&details),
            Duration::from_secs(15) + options.realtime_request_timeout
        );
    }

    #[test]
    fn state_ttl_prefers_advertised_value() {
        let options = ClientOptions::default();
        let details = ConnectionDetails {
            connection_state_ttl: Some(5_000),
            ..ConnectionDetails::default()
        };
        assert_eq!(options.state_ttl(&details), Duration::from_secs(5));
        assert_eq!(
            options.state_ttl(&ConnectionDetails::default()),
            Duration::from_secs(120)
        );
    }
}
