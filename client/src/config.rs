//! Configuration resolution for Astronomer auto-tracking.
//!
//! Settings are resolved once at startup from one of two sources, in order of
//! precedence:
//!
//! 1. A process-wide override object (`ASTRONOMER_CONFIG`).
//! 2. The `public.astronomer` path inside the application settings
//!    (`METEOR_SETTINGS`).
//!
//! When the override is present it is used on its own; the application
//! settings are not consulted. A missing `appId` disables tracking entirely.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `ASTRONOMER_CONFIG` | No | - | JSON object overriding the settings below |
//! | `METEOR_SETTINGS` | No | - | Application settings JSON containing `public.astronomer` |
//!
//! # Settings Keys
//!
//! | Key | Type | Default | Description |
//! |-----|------|---------|-------------|
//! | `appId` | string | - | Required to enable tracking |
//! | `disableUserTracking` | bool | false | Skip identity tracking |
//! | `disableRouteTracking` | bool | false | Skip page view tracking |
//! | `disableMethodTracking` | bool | false | Skip method call tracking |
//! | `includeCallPayloads` | bool | false | Attach `args` and `res` to method events |
//! | `includeSession` | bool | false | Attach session keys to page and method events |
//!
//! # Example
//!
//! ```
//! use astronomer_client::config::{resolve, Resolution};
//! use serde_json::json;
//!
//! let app_settings = json!({ "public": { "astronomer": { "appId": "abc123" } } });
//! let resolution = resolve(None, Some(&app_settings));
//!
//! let settings = resolution.settings().expect("tracking should be enabled");
//! assert_eq!(settings.app_id, "abc123");
//! assert!(!settings.disable_method_tracking);
//! ```

use std::env;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable holding the override settings object.
pub const OVERRIDE_ENV_VAR: &str = "ASTRONOMER_CONFIG";

/// Environment variable holding the application settings document.
pub const APP_SETTINGS_ENV_VAR: &str = "METEOR_SETTINGS";

/// Path to the Astronomer block inside the application settings.
const SETTINGS_PATH: [&str; 2] = ["public", "astronomer"];

/// Keys consumed by [`Settings`]; everything else is carried in `extra`.
const KNOWN_KEYS: [&str; 6] = [
    "appId",
    "disableUserTracking",
    "disableRouteTracking",
    "disableMethodTracking",
    "includeCallPayloads",
    "includeSession",
];

/// Errors that can occur while reading configuration from the environment.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable is set but does not hold valid JSON.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Resolved Astronomer settings.
///
/// Immutable once resolved. Serializes back to the camelCase shape it was
/// read from, so it can be handed to the sink's `initialize` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Application identifier registered with the ingestion service.
    pub app_id: String,

    /// When true, the identity tracker is not installed.
    pub disable_user_tracking: bool,

    /// When true, the navigation tracker is not installed.
    pub disable_route_tracking: bool,

    /// When true, the call interceptor is not installed.
    pub disable_method_tracking: bool,

    /// When true, method events carry the call's `args` and `res`.
    pub include_call_payloads: bool,

    /// When true, page and method events carry the current session keys.
    pub include_session: bool,

    /// Any other keys found in the settings block, forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Creates settings with the given app id and every feature enabled.
    #[must_use]
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            disable_user_tracking: false,
            disable_route_tracking: false,
            disable_method_tracking: false,
            include_call_payloads: false,
            include_session: false,
            extra: Map::new(),
        }
    }

    /// Reads settings from a JSON object.
    ///
    /// Returns `None` when `appId` is missing, empty, or not a string. Flags
    /// that are missing or not booleans default to `false`.
    #[must_use]
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let app_id = object
            .get("appId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())?;

        let flag = |key: &str| object.get(key).and_then(Value::as_bool).unwrap_or(false);

        let extra = object
            .iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(Self {
            app_id: app_id.to_string(),
            disable_user_tracking: flag("disableUserTracking"),
            disable_route_tracking: flag("disableRouteTracking"),
            disable_method_tracking: flag("disableMethodTracking"),
            include_call_payloads: flag("includeCallPayloads"),
            include_session: flag("includeSession"),
            extra,
        })
    }
}

/// Outcome of configuration resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Tracking is enabled with these settings.
    Enabled(Settings),
    /// No app id was configured; nothing should be installed.
    Disabled,
}

impl Resolution {
    /// Resolves settings from `ASTRONOMER_CONFIG` and `METEOR_SETTINGS`.
    ///
    /// Unset variables are treated as absent sources.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if either variable is set but is not valid JSON.
    pub fn from_env() -> Result<Self, ConfigError> {
        let override_config = read_json_env(OVERRIDE_ENV_VAR)?;
        let app_settings = read_json_env(APP_SETTINGS_ENV_VAR)?;
        Ok(resolve(override_config.as_ref(), app_settings.as_ref()))
    }

    /// Returns the settings if tracking is enabled.
    #[must_use]
    pub fn settings(&self) -> Option<&Settings> {
        match self {
            Self::Enabled(settings) => Some(settings),
            Self::Disabled => None,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

/// Resolves settings from an optional override and optional application settings.
///
/// The override wins whenever it is a JSON object, even if it lacks an `appId`.
/// Otherwise the `public.astronomer` object of `app_settings` is used. Values of
/// the wrong shape at any level are treated as absent.
///
/// Logs a warning when the result is [`Resolution::Disabled`].
///
/// # Example
///
/// ```
/// use astronomer_client::config::{resolve, Resolution};
/// use serde_json::json;
///
/// let override_config = json!({ "appId": "from-override" });
/// let app_settings = json!({ "public": { "astronomer": { "appId": "from-settings" } } });
///
/// let resolution = resolve(Some(&override_config), Some(&app_settings));
/// assert_eq!(resolution.settings().unwrap().app_id, "from-override");
///
/// assert_eq!(resolve(None, None), Resolution::Disabled);
/// ```
#[must_use]
pub fn resolve(override_config: Option<&Value>, app_settings: Option<&Value>) -> Resolution {
    let block = match override_config.and_then(Value::as_object) {
        Some(object) => {
            debug!("Using override settings");
            Some(object)
        }
        None => app_settings.and_then(nested_settings),
    };

    match block.and_then(Settings::from_object) {
        Some(settings) => {
            debug!(app_id = %settings.app_id, "Astronomer settings resolved");
            Resolution::Enabled(settings)
        }
        None => {
            warn!("Astronomer settings not found, skipping setup");
            Resolution::Disabled
        }
    }
}

/// Walks `public.astronomer` inside the application settings.
fn nested_settings(app_settings: &Value) -> Option<&Map<String, Value>> {
    SETTINGS_PATH
        .iter()
        .try_fold(app_settings, |value, key| value.get(*key))
        .and_then(Value::as_object)
}

/// Reads and parses a JSON environment variable, `None` when unset.
fn read_json_env(key: &str) -> Result<Option<Value>, ConfigError> {
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected JSON, {e}"),
            }),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}
