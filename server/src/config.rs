//! Server configuration module.
//!
//! The publication reads the same settings sources as the client, from
//! environment variables holding JSON.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ASTRONOMER_CONFIG` | No | - | Override settings object; wins when it is an object |
//! | `METEOR_SETTINGS` | No | - | Application settings; read at `public.astronomer` |
//!
//! Unlike the client, the server does not require an `appId`: only
//! `disableUserTracking` is consulted, and absent settings leave publication
//! enabled.

use std::env;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Override settings variable.
pub const OVERRIDE_ENV_VAR: &str = "ASTRONOMER_CONFIG";

/// Application settings variable.
pub const APP_SETTINGS_ENV_VAR: &str = "METEOR_SETTINGS";

/// Path of the settings block inside the application settings.
const SETTINGS_PATH: [&str; 2] = ["public", "astronomer"];

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },
}

/// Publication configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// When true, every connection gets an empty, immediately ready publication.
    pub disable_user_tracking: bool,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if either variable is set but does not hold JSON.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use astronomer_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("User tracking disabled: {}", config.disable_user_tracking);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let override_config = parse_json_env(OVERRIDE_ENV_VAR)?;
        let app_settings = parse_json_env(APP_SETTINGS_ENV_VAR)?;
        Ok(Self::from_sources(
            override_config.as_ref(),
            app_settings.as_ref(),
        ))
    }

    /// Resolves configuration from an override and application settings.
    ///
    /// The override is used whenever it is a JSON object; otherwise the
    /// `public.astronomer` block of `app_settings`. Anything of the wrong
    /// shape counts as absent.
    #[must_use]
    pub fn from_sources(override_config: Option<&Value>, app_settings: Option<&Value>) -> Self {
        let settings = override_config.filter(|v| v.is_object()).or_else(|| {
            app_settings.and_then(|root| {
                SETTINGS_PATH
                    .iter()
                    .try_fold(root, |value, key| value.get(*key))
                    .filter(|v| v.is_object())
            })
        });

        let disable_user_tracking = settings
            .and_then(|s| s.get("disableUserTracking"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        debug!(disable_user_tracking, "Resolved publication config");
        Self {
            disable_user_tracking,
        }
    }
}

/// Parse an environment variable holding JSON.
///
/// Unset or blank variables yield `None`.
fn parse_json_env(name: &str) -> Result<Option<Value>, ConfigError> {
    let raw = match env::var(name) {
        Ok(s) if !s.trim().is_empty() => s,
        Ok(_) | Err(env::VarError::NotPresent) => return Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            return Err(ConfigError::InvalidFormat {
                var: name.to_string(),
                message: "contains invalid unicode".to_string(),
            })
        }
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| ConfigError::InvalidFormat {
            var: name.to_string(),
            message: e.to_string(),
        })
}
