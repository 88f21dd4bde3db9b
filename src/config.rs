//! Server configuration: a builder-style [`ServerConfig`] with defaults
//! overridable via environment variables, mirroring the builder pattern
//! used throughout this codebase for client-facing configuration structs.

use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:12348";
const DEFAULT_MAX_CONNECTIONS: usize = 100;
const DEFAULT_MONITORS_PATH: &str = "monitors.txt";
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_SEND_QUEUE_CAPACITY: usize = 100;

/// Protocol version accepted during the connection handshake.
pub const PROTOCOL_VERSION: u8 = crate::protocol::PROTOCOL_VERSION;

/// All tunables for one server process.
///
/// # Example
///
/// ```
/// use phira_lobby_server::config::ServerConfig;
///
/// let config = ServerConfig::new("https://phira.example/api")
///     .with_bind_addr("0.0.0.0:9000")
///     .with_max_connections(50);
/// assert_eq!(config.max_connections, 50);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the external identity/chart/record HTTP service.
    pub identity_base_url: String,
    /// Address the TCP listener binds to. Defaults to **0.0.0.0:12348**.
    pub bind_addr: String,
    /// Maximum number of concurrently accepted connections, enforced by a
    /// semaphore at accept time. Defaults to **100**.
    pub max_connections: usize,
    /// Path to the whitespace-separated monitor-id roster, read once at
    /// startup. Defaults to **monitors.txt**.
    pub monitors_path: String,
    /// How long a connection may sit idle before the health check closes it.
    /// Defaults to **120s**.
    pub inactivity_timeout: Duration,
    /// Interval between inactivity sweeps. Defaults to **30s**.
    pub health_check_interval: Duration,
    /// Timeout for the initial protocol-version handshake byte. Defaults to
    /// **10s**.
    pub handshake_timeout: Duration,
    /// Timeout for reading one inbound message once connected. Defaults to
    /// **300s**.
    pub read_timeout: Duration,
    /// Capacity of each connection's outbound queue. Sends beyond this are
    /// dropped rather than applying backpressure. Defaults to **100**.
    pub send_queue_capacity: usize,
}

impl ServerConfig {
    pub fn new(identity_base_url: impl Into<String>) -> Self {
        Self {
            identity_base_url: identity_base_url.into(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            monitors_path: DEFAULT_MONITORS_PATH.to_string(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }

    /// Builds a config from environment variables, falling back to defaults
    /// for anything unset. `PHIRA_LOBBY_IDENTITY_URL` is the only variable
    /// without a sensible default, so its absence is treated as an error by
    /// the caller (typically `main`), not by this function.
    pub fn from_env() -> Self {
        let identity_base_url = std::env::var("PHIRA_LOBBY_IDENTITY_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let mut config = Self::new(identity_base_url);
        if let Ok(addr) = std::env::var("PHIRA_LOBBY_BIND_ADDR") {
            config = config.with_bind_addr(addr);
        }
        if let Ok(n) = std::env::var("PHIRA_LOBBY_MAX_CONNECTIONS") {
            if let Ok(n) = n.parse() {
                config = config.with_max_connections(n);
            }
        }
        if let Ok(path) = std::env::var("PHIRA_LOBBY_MONITORS_PATH") {
            config = config.with_monitors_path(path);
        }
        config
    }

    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    #[must_use]
    pub fn with_monitors_path(mut self, path: impl Into<String>) -> Self {
        self.monitors_path = path.into();
        self
    }

    #[must_use]
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::new("https://example.com");
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.send_queue_capacity, DEFAULT_SEND_QUEUE_CAPACITY);
    }

    #[test]
    fn max_connections_is_clamped_to_at_least_one() {
        let config = ServerConfig::new("https://example.com").with_max_connections(0);
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn builder_methods_chain() {
        let config = ServerConfig::new("https://example.com")
            .with_bind_addr("127.0.0.1:1")
            .with_monitors_path("m.txt");
        assert_eq!(config.bind_addr, "127.0.0.1:1");
        assert_eq!(config.monitors_path, "m.txt");
    }
}
