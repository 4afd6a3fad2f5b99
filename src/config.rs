//! Client configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relay used when none is configured
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:9000";

/// Environment variable overriding the relay URL
pub const RELAY_ENV: &str = "AGENT_MESSENGER_RELAY";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "AGENT_MESSENGER_DATA_DIR";

/// Path appended to the relay URL to reach its messaging endpoint
const MESSAGING_PATH: &str = "/ws";

/// Automatic reconnection schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Ceiling for the doubling delay
    pub max_delay: Duration,
    /// Attempts before giving up for good
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Everything a [`crate::SecureMessagingClient`] needs to start
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay base URL, e.g. `ws://localhost:9000`
    pub relay_url: String,
    /// Profile directory holding identity, contacts and messages
    pub data_dir: PathBuf,
    /// Reconnect schedule
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Config for a relay and data directory with the default reconnect policy
    pub fn new(relay_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        ClientConfig {
            relay_url: relay_url.into(),
            data_dir: data_dir.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Replace the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The relay's messaging endpoint
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.relay_url.trim_end_matches('/'), MESSAGING_PATH)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new(DEFAULT_RELAY_URL, default_data_dir())
    }
}

/// Default profile directory
///
/// `%APPDATA%\agent-messenger` on Windows, `~/.agent-messenger` elsewhere.
pub fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        if let Some(appdata) = dirs::data_dir() {
            return appdata.join("agent-messenger");
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-messenger")
}

/// Directory of a named profile under `base`
pub fn profile_dir(base: &Path, name: &str) -> PathBuf {
    base.join("profiles").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = ClientConfig::new("ws://relay.example:9000/", "/tmp/x");
        assert_eq!(config.endpoint(), "ws://relay.example:9000/ws");

        let config = ClientConfig::new("wss://relay.example", "/tmp/x");
        assert_eq!(config.endpoint(), "wss://relay.example/ws");
    }

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(2000));
        assert_eq!(policy.max_delay, Duration::from_millis(60_000));
        assert_eq!(policy.max_attempts, 10);
    }

    #[test]
    fn test_profile_dir() {
        let dir = profile_dir(Path::new("/base"), "work");
        assert_eq!(dir, Path::new("/base/profiles/work"));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert!(config.data_dir.ends_with(if cfg!(windows) {
            "agent-messenger"
        } else {
            ".agent-messenger"
        }));
    }
}
