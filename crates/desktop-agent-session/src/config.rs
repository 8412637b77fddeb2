//! Agent configuration: TOML file plus environment overrides.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`EndpointConfig::ws_url`].
pub const ENV_WS_URL: &str = "DESKTOP_AGENT_WS_URL";
/// Environment variable overriding [`EndpointConfig::api_url`].
pub const ENV_API_URL: &str = "DESKTOP_AGENT_API_URL";
/// Environment variable overriding [`AuthConfig::mode`].
pub const ENV_AUTH_MODE: &str = "DESKTOP_AGENT_AUTH_MODE";

const APP_DIR: &str = "desktop-agent";

#[cfg(debug_assertions)]
const DEFAULT_WS_URL: &str = "ws://localhost:8000/v1/desktop-agent/ws";
#[cfg(not(debug_assertions))]
const DEFAULT_WS_URL: &str = "wss://api.thebeakr.com/v1/desktop-agent/ws";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// How the agent authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Long-lived device credential obtained by pairing.
    #[default]
    Device,
    /// Short-lived identity-provider token, refreshed on a timer.
    IdentityProvider,
    /// No credential; the service accepts a fixed development identity.
    Development,
}

impl std::str::FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "device" => Ok(Self::Device),
            "identity_provider" | "idp" => Ok(Self::IdentityProvider),
            "development" | "dev" => Ok(Self::Development),
            _ => Err(ConfigError::Invalid {
                key: "auth.mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Remote endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub ws_url: String,
    /// HTTP base for pairing. Derived from `ws_url` when absent.
    pub api_url: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Identity-provider refresh period. Tokens live about 50 seconds.
    pub refresh_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Device,
            refresh_interval_secs: 40,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Connection timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub heartbeat_secs: u64,
    pub handshake_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_secs: u64,
    pub tool_timeout_secs: u64,
    /// Pause before reconnecting after the service expired the session.
    pub session_expired_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 45,
            handshake_timeout_secs: 10,
            backoff_base_ms: 1000,
            backoff_max_secs: 30,
            tool_timeout_secs: 120,
            session_expired_delay_ms: 500,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    #[must_use]
    pub const fn session_expired_delay(&self) -> Duration {
        Duration::from_millis(self.session_expired_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Credential file. Defaults to `<config dir>/desktop-agent/credentials.json`.
    pub token_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolved credential file path, if a config directory exists.
    #[must_use]
    pub fn token_path(&self) -> Option<PathBuf> {
        self.token_path
            .clone()
            .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_DIR).join("credentials.json")))
    }
}

/// Initial device settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Display name. Defaults to the host name.
    pub name: Option<String>,
    /// Folders the service may read.
    pub scoped_folders: Vec<String>,
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub endpoint: EndpointConfig,
    pub auth: AuthConfig,
    pub connection: ConnectionConfig,
    pub storage: StorageConfig,
    pub device: DeviceConfig,
}

impl AgentConfig {
    /// Default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load configuration.
    ///
    /// Reads `path` if given, else the default location if that file exists,
    /// else starts from defaults. Environment overrides are applied last.
    ///
    /// # Errors
    /// Returns an error if an explicit file is missing, a file does not
    /// parse, or an override is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject timings the connection and auth loops cannot run with.
    ///
    /// Periods and timeouts must be non-zero. The session-expired pause may
    /// be zero.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("auth.refresh_interval_secs", self.auth.refresh_interval_secs),
            ("connection.heartbeat_secs", self.connection.heartbeat_secs),
            (
                "connection.handshake_timeout_secs",
                self.connection.handshake_timeout_secs,
            ),
            ("connection.backoff_base_ms", self.connection.backoff_base_ms),
            ("connection.backoff_max_secs", self.connection.backoff_max_secs),
            ("connection.tool_timeout_secs", self.connection.tool_timeout_secs),
        ];
        match required.into_iter().find(|(_, value)| *value == 0) {
            Some((key, value)) => Err(ConfigError::Invalid {
                key,
                value: value.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Apply overrides from `lookup` (normally the process environment).
    ///
    /// # Errors
    /// Returns an error if the auth mode override is not recognized.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup(ENV_WS_URL) {
            self.endpoint.ws_url = url;
        }
        if let Some(url) = lookup(ENV_API_URL) {
            self.endpoint.api_url = Some(url);
        }
        if let Some(mode) = lookup(ENV_AUTH_MODE) {
            self.auth.mode = mode.parse()?;
        }
        Ok(())
    }
}
