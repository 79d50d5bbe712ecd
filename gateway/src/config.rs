//! Configuration management for the gateway.
//!
//! Settings come from the process environment (optionally seeded from a
//! `.env` file by `main`). The three GLPI credentials are required; a
//! missing one stops the process at startup.

use std::fmt;
use std::time::Duration;

/// Per-call timeout used when `GLPI_TIMEOUT_SECS` is not set.
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Base URL of GLPI's REST API, e.g. `https://glpi.example.com/apirest.php`
    pub api_url: String,
    /// Application token sent as `App-Token`
    pub app_token: String,
    /// User token exchanged for a session on every request
    pub user_token: String,
    /// Upper bound for each outbound call
    pub timeout: Duration,
    pub bind_addr: String,
    pub port: u16,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_url", &self.api_url)
            .field("app_token", &"***")
            .field("user_token", &"***")
            .field("timeout", &self.timeout)
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .finish()
    }
}

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required =
            |key: &'static str| value(key).ok_or(ConfigError::MissingValue(key));

        let api_url = required("GLPI_API_URL")?;
        let app_token = required("GLPI_APP_TOKEN")?;
        let user_token = required("GLPI_USER_TOKEN")?;

        let timeout_secs = match value("GLPI_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue("GLPI_TIMEOUT_SECS", raw))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let port = match value("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("PORT", raw))?,
            None => DEFAULT_PORT,
        };

        Ok(GatewayConfig {
            api_url,
            app_token,
            user_token,
            timeout: Duration::from_secs(timeout_secs),
            bind_addr: value("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            port,
        })
    }
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration value is missing
    #[error("Missing required configuration value: {0}")]
    MissingValue(&'static str),
    /// A configuration value could not be parsed
    #[error("Invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}
