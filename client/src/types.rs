//! Tracking event types.
//!
//! These are the values the trackers hand to an [`AnalyticsSink`], plus the
//! [`Message`] envelope the HTTP sink puts on the wire. All wire types
//! serialize to camelCase JSON.
//!
//! [`AnalyticsSink`]: crate::sink::AnalyticsSink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Free-form properties attached to page and track calls.
pub type Properties = Map<String, Value>;

/// Identity traits attached to an identify call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Traits {
    #[must_use]
    pub fn with_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
        }
    }
}

/// A user identity derived from the current user document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// The user id; `None` when no user is signed in.
    pub id: Option<String>,
    pub traits: Traits,
}

/// A page view produced by a single navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub page_name: String,
    pub properties: Properties,
}

impl NavigationEvent {
    /// Builds a page view carrying the route parameters under `routeParams`.
    #[must_use]
    pub fn new(page_name: impl Into<String>, route_params: Map<String, Value>) -> Self {
        let mut properties = Properties::new();
        properties.insert("routeParams".to_string(), Value::Object(route_params));
        Self {
            page_name: page_name.into(),
            properties,
        }
    }
}

/// A successfully completed remote method call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCallEvent {
    pub method_name: String,
}

impl MethodCallEvent {
    #[must_use]
    pub fn new(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
        }
    }

    /// The tracked event name, e.g. `Called createPost Method`.
    ///
    /// ```
    /// use astronomer_client::types::MethodCallEvent;
    ///
    /// assert_eq!(MethodCallEvent::new("foo").event_name(), "Called foo Method");
    /// ```
    #[must_use]
    pub fn event_name(&self) -> String {
        format!("Called {} Method", self.method_name)
    }
}

/// Body of a message sent to the ingestion endpoint.
///
/// Uses serde's internally tagged representation, so each message carries a
/// `type` of `identify`, `page` or `track`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Identify {
        #[serde(rename = "userId")]
        user_id: Option<String>,
        traits: Traits,
    },
    Page {
        name: String,
        properties: Properties,
    },
    Track {
        event: String,
        properties: Properties,
    },
}

impl MessageKind {
    /// Path segment of the ingestion endpoint for this message.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Page { .. } => "page",
            Self::Track { .. } => "track",
        }
    }
}

/// An analytics message with delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: Uuid,
    pub app_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    /// Creates a message stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(app_id: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            app_id: app_id.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}
