//! Configuration module
//!
//! Handles loading and saving bridge configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::presence::DEFAULT_PRESENCE_TIMEOUT;
use crate::protocol::DEFAULT_PORT;

/// Environment variable overriding `core.host`
pub const ENV_CORE_HOST: &str = "FSX_CORE_TCP_HOST";

/// Environment variable overriding `core.port`
pub const ENV_CORE_PORT: &str = "FSX_CORE_TCP_PORT";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Core connection settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Persistent session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Presence settings
    #[serde(default)]
    pub presence: PresenceConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Tracing filter directive (e.g. "fsx_bridge=debug"); `RUST_LOG` wins if set
    pub log_filter: Option<String>,
}

/// Core connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Core host
    #[serde(default = "default_host")]
    pub host: String,
    /// Core client protocol port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for one-shot requests in ms
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout() -> u64 {
    2000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl CoreConfig {
    /// `host:port` of Core
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Persistent session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Connect and login timeout in ms
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    /// Interval between keep-alive pings in ms
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
    /// Timeout for a single keep-alive write in ms
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

fn default_handshake_timeout() -> u64 {
    5000
}

fn default_keepalive_interval() -> u64 {
    5000
}

fn default_send_timeout() -> u64 {
    5000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            keepalive_interval_ms: default_keepalive_interval(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        // interval() panics on a zero period
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Presence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Timeout for the Core online-list query in ms
    #[serde(default = "default_presence_timeout")]
    pub core_timeout_ms: u64,
}

fn default_presence_timeout() -> u64 {
    DEFAULT_PRESENCE_TIMEOUT.as_millis() as u64
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            core_timeout_ms: default_presence_timeout(),
        }
    }
}

impl PresenceConfig {
    pub fn core_timeout(&self) -> Duration {
        Duration::from_millis(self.core_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("fsx-bridge/config.toml")),
            Some(PathBuf::from("./fsx-bridge.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `FSX_CORE_TCP_HOST` / `FSX_CORE_TCP_PORT` from the environment
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_CORE_HOST) {
            self.core.host = host;
        }

        if let Some(port) = lookup(ENV_CORE_PORT) {
            self.core.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_CORE_PORT,
                value: port.clone(),
            })?;
        }

        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            verbose: false,
            log_filter: Some("fsx_bridge=info".to_string()),
        },
        core: CoreConfig {
            host: "core.internal".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.core.port, DEFAULT_PORT);
        assert_eq!(config.core.address(), "127.0.0.1:9000");
        assert_eq!(config.session.keepalive_interval(), Duration::from_secs(5));
        assert_eq!(config.presence.core_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.core.port = 9100;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.core.port, 9100);
        assert_eq!(loaded.session.handshake_timeout_ms, 5000);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[core]\nhost = \"10.0.0.5\"\n\n[session]\nkeepalive_interval_ms = 250"
        )
        .unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.core.host, "10.0.0.5");
        assert_eq!(loaded.core.port, DEFAULT_PORT);
        assert_eq!(loaded.session.keepalive_interval_ms, 250);
        assert_eq!(loaded.session.send_timeout_ms, 5000);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/fsx-bridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(|name| match name {
                ENV_CORE_HOST => Some("core.example".to_string()),
                ENV_CORE_PORT => Some("9001".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.core.address(), "core.example:9001");

        let err = config
            .apply_overrides(|name| (name == ENV_CORE_PORT).then(|| "ninety".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: ENV_CORE_PORT, .. }));
        assert_eq!(config.core.port, 9001);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.core.host, "core.internal");
        assert_eq!(parsed.general.log_filter.as_deref(), Some("fsx_bridge=info"));
    }
}
