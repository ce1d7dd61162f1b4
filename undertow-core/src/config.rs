//! Centralized configuration for Undertow.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Undertow components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub server: ServerConfig,
    pub lifecycle: LifecycleConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
    pub watchdog: WatchdogConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8042,
        }
    }
}

/// Session lifecycle timing.
///
/// Controls how long content may stay unwatched before the transfer is
/// paused and later reclaimed, and how streaming requests behave while
/// metadata is still being acquired.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Time allowed for metadata acquisition before the session fails
    pub metadata_timeout: Duration,
    /// Time with zero connections before the transfer is paused
    pub pause_timeout: Duration,
    /// Time after pausing before the session is destroyed
    pub remove_timeout: Duration,
    /// Delay before redirecting a request that arrived during metadata acquisition
    pub retry_delay: Duration,
    /// Streamed bytes after which a session counts as serving
    pub serving_threshold: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(20),
            pause_timeout: Duration::from_secs(10),
            remove_timeout: Duration::from_secs(20),
            retry_delay: Duration::from_secs(1),
            serving_threshold: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

/// Download location and retention.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory used when a request does not name one
    pub default_download_dir: PathBuf,
    /// Keep downloaded data when a session is destroyed
    pub keep_files: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_download_dir: PathBuf::from("."),
            keep_files: false,
        }
    }
}

/// Analytics reporting.
///
/// Telemetry is disabled while no token is configured.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Mixpanel project token
    pub mixpanel_token: Option<String>,
    /// Base64 JSON object merged into every event
    pub mixpanel_data: Option<String>,
}

impl TelemetryConfig {
    pub fn is_enabled(&self) -> bool {
        self.mixpanel_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

/// Parent process monitoring.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Process whose exit shuts the server down
    pub parent_pid: Option<u32>,
    /// How often the parent is checked
    pub poll_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            parent_pid: None,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("UNDERTOW_PORT") {
            config.server.port = port;
        }

        if let Some(seconds) = env_parse::<u64>("UNDERTOW_PAUSE_TIMEOUT") {
            config.lifecycle.pause_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_parse::<u64>("UNDERTOW_REMOVE_TIMEOUT") {
            config.lifecycle.remove_timeout = Duration::from_secs(seconds);
        }

        if let Some(keep) = env_parse::<bool>("UNDERTOW_KEEP_FILES") {
            config.storage.keep_files = keep;
        }

        if let Ok(token) = std::env::var("UNDERTOW_MIXPANEL_TOKEN") {
            if !token.trim().is_empty() {
                config.telemetry.mixpanel_token = Some(token);
            }
        }

        config
    }

    /// Creates a configuration with short timeouts for tests.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.lifecycle.metadata_timeout = Duration::from_secs(5);
        config.lifecycle.pause_timeout = Duration::from_secs(2);
        config.lifecycle.remove_timeout = Duration::from_secs(3);
        config.lifecycle.retry_delay = Duration::from_millis(100);
        config.lifecycle.serving_threshold = 1024;
        config.storage.default_download_dir = std::env::temp_dir();
        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = UndertowConfig::default();
        assert_eq!(config.server.port, 8042);
        assert_eq!(config.lifecycle.metadata_timeout, Duration::from_secs(20));
        assert_eq!(config.lifecycle.pause_timeout, Duration::from_secs(10));
        assert_eq!(config.lifecycle.remove_timeout, Duration::from_secs(20));
        assert_eq!(config.lifecycle.retry_delay, Duration::from_secs(1));
        assert_eq!(config.lifecycle.serving_threshold, 10_485_760);
        assert!(!config.storage.keep_files);
        assert!(!config.telemetry.is_enabled());
        assert_eq!(
            config.server.socket_addr(),
            "127.0.0.1:8042".parse().unwrap()
        );
    }

    #[test]
    fn test_blank_token_disables_telemetry() {
        let telemetry = TelemetryConfig {
            mixpanel_token: Some("  ".to_string()),
            mixpanel_data: None,
        };
        assert!(!telemetry.is_enabled());
    }
}
