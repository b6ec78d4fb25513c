//! Identity tracking.
//!
//! Watches the current user's projection document (published by the server
//! into the `AstronomerUser` channel) and calls `identify` on every change.
//! The projection is used instead of the raw account record because the live
//! data protocol only merges top-level fields, and provider emails are nested
//! under `services`.
//!
//! # Email Resolution
//!
//! The `email` trait is taken from the first non-empty source, in order:
//!
//! 1. `emails[0].address` (password accounts)
//! 2. `services.<provider>.email` for each federated provider, in
//!    registration order (only when federated login is available)
//!
//! # Example
//!
//! ```
//! use astronomer_client::trackers::identity::{email_address, UserDocument};
//! use serde_json::json;
//!
//! let user: UserDocument = serde_json::from_value(json!({
//!     "_id": "u1",
//!     "services": { "google": { "email": "ada@gmail.com" } }
//! }))
//! .unwrap();
//!
//! let providers = vec!["github".to_string(), "google".to_string()];
//! assert_eq!(email_address(&user, Some(providers.as_slice())), Some("ada@gmail.com".to_string()));
//! assert_eq!(email_address(&user, None), None);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::reactive::{Observable, Subscription};
use crate::sink::AnalyticsSink;
use crate::types::{IdentityRecord, Traits};

/// Registry of federated login providers.
pub trait OAuthRegistry: Send + Sync {
    /// Provider names in registration order, e.g. `["github", "google"]`.
    fn service_names(&self) -> Vec<String>;
}

impl OAuthRegistry for Vec<String> {
    fn service_names(&self) -> Vec<String> {
        self.clone()
    }
}

/// The host's account capability.
///
/// Its presence is the feature flag for identity tracking.
#[derive(Clone)]
pub struct Accounts {
    /// The current user's projection document, `None` when signed out.
    pub user: Arc<dyn Observable<Option<UserDocument>>>,

    /// Federated login providers, if federated login is installed.
    pub oauth: Option<Arc<dyn OAuthRegistry>>,
}

/// One entry of a user's `emails` array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailEntry {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

/// The user projection document as seen by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id", default)]
    pub id: Option<String>,

    #[serde(default)]
    pub emails: Vec<EmailEntry>,

    /// Per-provider service data, each possibly holding an `email`.
    #[serde(default)]
    pub services: Map<String, Value>,
}

impl UserDocument {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, address: impl Into<String>) -> Self {
        self.emails.push(EmailEntry {
            address: Some(address.into()),
            verified: false,
        });
        self
    }

    #[must_use]
    pub fn with_service_email(mut self, provider: &str, email: impl Into<String>) -> Self {
        let mut service = Map::new();
        service.insert("email".to_string(), Value::String(email.into()));
        self.services.insert(provider.to_string(), Value::Object(service));
        self
    }

    /// The email stored for `provider`, if any.
    #[must_use]
    pub fn service_email(&self, provider: &str) -> Option<&str> {
        self.services
            .get(provider)
            .and_then(|service| service.get("email"))
            .and_then(Value::as_str)
            .filter(|email| !email.is_empty())
    }
}

/// Finds an email address for `user`.
///
/// `providers` is `None` when federated login is not installed, in which case
/// only the native address is considered.
#[must_use]
pub fn email_address(user: &UserDocument, providers: Option<&[String]>) -> Option<String> {
    let native = user
        .emails
        .first()
        .and_then(|entry| entry.address.as_deref())
        .filter(|address| !address.is_empty());

    if let Some(address) = native {
        return Some(address.to_string());
    }

    providers?
        .iter()
        .find_map(|provider| user.service_email(provider))
        .map(str::to_string)
}

/// Sends one `identify` per user document change.
pub struct IdentityTracker {
    sink: Arc<dyn AnalyticsSink>,
    oauth: Option<Arc<dyn OAuthRegistry>>,
}

impl IdentityTracker {
    #[must_use]
    pub fn new(sink: Arc<dyn AnalyticsSink>, oauth: Option<Arc<dyn OAuthRegistry>>) -> Self {
        Self { sink, oauth }
    }

    /// Builds the identity record for `user`.
    #[must_use]
    pub fn record(&self, user: Option<&UserDocument>) -> IdentityRecord {
        let Some(user) = user else {
            return IdentityRecord::default();
        };

        let providers = self.oauth.as_ref().map(|oauth| oauth.service_names());
        IdentityRecord {
            id: user.id.clone(),
            traits: Traits {
                email: email_address(user, providers.as_deref()),
            },
        }
    }

    /// Identifies `user` with the sink, including when no user is present.
    pub fn identify(&self, user: Option<&UserDocument>) -> IdentityRecord {
        let record = self.record(user);
        debug!(
            user_id = record.id.as_deref().unwrap_or("<anonymous>"),
            has_email = record.traits.email.is_some(),
            "Identifying user"
        );
        self.sink.identify(record.id.as_deref(), &record.traits);
        record
    }

    /// Identifies the current user now, then again on every change.
    pub fn watch(self, user: &dyn Observable<Option<UserDocument>>) -> Subscription {
        self.identify(user.get().as_ref());

        let tracker = Arc::new(self);
        user.subscribe(Arc::new(move |doc: &Option<UserDocument>| {
            tracker.identify(doc.as_ref());
        }))
    }
}

/// Starts identity tracking if enabled and supported.
///
/// Returns `None` when user tracking is disabled, or when the host has no
/// account capability (logged as a warning; events stay anonymous).
pub fn start(
    settings: &Settings,
    accounts: Option<&Accounts>,
    sink: Arc<dyn AnalyticsSink>,
) -> Option<Subscription> {
    if settings.disable_user_tracking {
        debug!("User tracking disabled");
        return None;
    }

    let Some(accounts) = accounts else {
        warn!("Accounts not detected, all events will be anonymous");
        return None;
    };

    let tracker = IdentityTracker::new(sink, accounts.oauth.clone());
    Some(tracker.watch(accounts.user.as_ref()))
}
