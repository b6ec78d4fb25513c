//! Automatic tracking hooks.
//!
//! Each tracker wires one framework extension point to the analytics sink:
//!
//! - [`identity`]: identifies the current user whenever the user document changes
//! - [`navigation`]: records a page view for every route navigation
//! - [`method`]: records an event for every successful remote method call
//!
//! Trackers only react to host-driven events; none of them spawn work of their own.

pub mod identity;
pub mod method;
pub mod navigation;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::Settings;
use crate::types::Properties;

pub use identity::{Accounts, IdentityTracker, OAuthRegistry, UserDocument};
pub use method::{CallInterceptor, MethodCallback, MethodError, MethodInvoker, OptionsArg};
pub use navigation::{NavigationSource, NavigationTracker, Routers};

/// Read access to the host's session store.
pub trait SessionSource: Send + Sync {
    /// Returns the current session keys and values.
    fn keys(&self) -> Map<String, Value>;
}

/// Which optional payloads are attached to tracked events.
#[derive(Clone, Default)]
pub struct PayloadPolicy {
    /// Attach `args` and `res` to method events.
    pub include_call_payloads: bool,

    /// Session to attach under `session`; `None` leaves it out.
    pub session: Option<Arc<dyn SessionSource>>,
}

impl PayloadPolicy {
    /// Builds the policy from settings. The session is only attached when
    /// `includeSession` is set and the host provides one.
    #[must_use]
    pub fn from_settings(settings: &Settings, session: Option<Arc<dyn SessionSource>>) -> Self {
        Self {
            include_call_payloads: settings.include_call_payloads,
            session: session.filter(|_| settings.include_session),
        }
    }

    /// Adds the session keys to `properties` when enabled.
    pub fn decorate(&self, properties: &mut Properties) {
        if let Some(session) = &self.session {
            properties.insert("session".to_string(), Value::Object(session.keys()));
        }
    }
}

impl std::fmt::Debug for PayloadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadPolicy")
            .field("include_call_payloads", &self.include_call_payloads)
            .field("include_session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedSession;

    impl SessionSource for FixedSession {
        fn keys(&self) -> Map<String, Value> {
            let mut keys = Map::new();
            keys.insert("theme".to_string(), json!("dark"));
            keys
        }
    }

    #[test]
    fn default_policy_adds_nothing() {
        let mut properties = Properties::new();
        PayloadPolicy::default().decorate(&mut properties);
        assert!(properties.is_empty());
    }

    #[test]
    fn session_requires_setting() {
        let settings = Settings::new("app");
        let policy = PayloadPolicy::from_settings(&settings, Some(Arc::new(FixedSession)));
        assert!(policy.session.is_none());
    }

    #[test]
    fn session_is_attached_when_enabled() {
        let mut settings = Settings::new("app");
        settings.include_session = true;
        settings.include_call_payloads = true;

        let policy = PayloadPolicy::from_settings(&settings, Some(Arc::new(FixedSession)));
        assert!(policy.include_call_payloads);

        let mut properties = Properties::new();
        policy.decorate(&mut properties);
        assert_eq!(properties["session"], json!({ "theme": "dark" }));
    }
}
