//! Session configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use maillite_proto::{DEFAULT_NOTIFY_PORT, DEFAULT_PORT, MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Configuration for a session.
///
/// Durations are stored in milliseconds when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Server hostname.
    pub host: String,
    /// Command port.
    pub port: u16,
    /// Local datagram port for new-mail notifications, announced in `HELO`.
    pub notify_port: u16,
    /// Local address the notification socket binds to.
    pub notify_bind: IpAddr,
    /// Connection timeout.
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Idle timeout for every command read and write.
    #[serde(with = "duration_ms", rename = "io_timeout_ms")]
    pub io_timeout: Duration,
    /// Receive timeout of the notification loop; bounds how long a stop
    /// request can go unnoticed.
    #[serde(with = "duration_ms", rename = "notify_poll_interval_ms")]
    pub notify_poll_interval: Duration,
    /// How long logout waits for the notification loop to exit.
    #[serde(with = "duration_ms", rename = "listener_join_timeout_ms")]
    pub listener_join_timeout: Duration,
    /// Largest accepted message body, in bytes.
    pub max_message_size: usize,
    /// Where the read-state cache is persisted; in memory only if unset.
    pub read_state_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl SessionConfig {
    /// Creates a configuration with default ports and timeouts.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            notify_port: DEFAULT_NOTIFY_PORT,
            notify_bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(30),
            notify_poll_interval: Duration::from_secs(1),
            listener_join_timeout: Duration::from_secs(1),
            max_message_size: MAX_MESSAGE_SIZE,
            read_state_path: None,
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(host)
    }

    /// Returns the address the notification socket binds to.
    #[must_use]
    pub const fn notify_addr(&self) -> SocketAddr {
        SocketAddr::new(self.notify_bind, self.notify_port)
    }
}

/// Builder for session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(host),
        }
    }

    /// Sets the command port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the notification port.
    #[must_use]
    pub const fn notify_port(mut self, port: u16) -> Self {
        self.config.notify_port = port;
        self
    }

    /// Sets the local address for the notification socket.
    #[must_use]
    pub const fn notify_bind(mut self, addr: IpAddr) -> Self {
        self.config.notify_bind = addr;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Sets the notification receive timeout.
    #[must_use]
    pub const fn notify_poll_interval(mut self, interval: Duration) -> Self {
        self.config.notify_poll_interval = interval;
        self
    }

    /// Sets how long logout waits for the notification loop.
    #[must_use]
    pub const fn listener_join_timeout(mut self, timeout: Duration) -> Self {
        self.config.listener_join_timeout = timeout;
        self
    }

    /// Sets the largest accepted message body.
    #[must_use]
    pub const fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Persists the read-state cache at `path`.
    #[must_use]
    pub fn read_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.read_state_path = Some(path.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Serde helpers for `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)] // Required by serde with= signature
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("mail.example.com");
        assert_eq!(config.host, "mail.example.com");
        assert_eq!(config.port, 1234);
        assert_eq!(config.notify_port, 5555);
        assert_eq!(config.io_timeout, Duration::from_secs(30));
        assert_eq!(config.max_message_size, 65536);
        assert_eq!(config.notify_addr().to_string(), "0.0.0.0:5555");
        assert!(config.read_state_path.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::builder("mail.example.com")
            .port(2525)
            .notify_port(0)
            .notify_bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .io_timeout(Duration::from_secs(5))
            .read_state_path("/tmp/read.json")
            .build();

        assert_eq!(config.port, 2525);
        assert_eq!(config.notify_addr().to_string(), "127.0.0.1:0");
        assert_eq!(config.io_timeout, Duration::from_secs(5));
        assert_eq!(config.read_state_path, Some(PathBuf::from("/tmp/read.json")));
    }

    #[test]
    fn test_config_from_partial_json() {
        let json = r#"{"host": "mail.lan", "port": 4000, "io_timeout_ms": 1500}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.host, "mail.lan");
        assert_eq!(config.port, 4000);
        assert_eq!(config.io_timeout, Duration::from_millis(1500));
        assert_eq!(config.notify_port, 5555);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = SessionConfig::builder("mail.lan")
            .listener_join_timeout(Duration::from_millis(250))
            .build();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"listener_join_timeout_ms\":250"));
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
