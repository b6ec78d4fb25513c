//! Analytics sink contract and implementations.
//!
//! Trackers never talk to the network themselves; they push into an
//! [`AnalyticsSink`]. Delivery, batching and retries are the sink's concern.
//!
//! Two implementations are provided:
//!
//! - [`HttpSink`] posts each call as a JSON [`Message`] to the ingestion
//!   endpoint, fire-and-forget, on the ambient tokio runtime.
//! - [`MemorySink`] records every call in order, for hosts that forward
//!   events themselves and for tests.
//!
//! # Example
//!
//! ```
//! use astronomer_client::config::Settings;
//! use astronomer_client::sink::{AnalyticsSink, MemorySink, SinkCall};
//! use astronomer_client::types::Properties;
//!
//! let sink = MemorySink::new();
//! sink.initialize(&Settings::new("app-1"));
//! sink.track("Called foo Method", &Properties::new());
//!
//! assert_eq!(sink.tracked_events(), vec!["Called foo Method".to_string()]);
//! assert!(matches!(sink.calls()[0], SinkCall::Initialize(_)));
//! ```

use std::env;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::config::Settings;
use crate::types::{Message, MessageKind, Properties, Traits};

/// Environment variable overriding the ingestion endpoint.
pub const ENDPOINT_ENV_VAR: &str = "ASTRONOMER_ENDPOINT";

/// Default ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.astronomer.io";

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Header carrying the application id.
const APP_ID_HEADER: &str = "X-Astronomer-App-Id";

/// The analytics ingestion contract.
///
/// All methods are fire-and-forget: they return nothing and must not block
/// the caller on delivery. `identify` must tolerate a missing user id.
pub trait AnalyticsSink: Send + Sync {
    /// Called once, before any other method, with the resolved settings.
    fn initialize(&self, settings: &Settings);

    /// Associates the current visitor with a user id and traits.
    fn identify(&self, user_id: Option<&str>, traits: &Traits);

    /// Records a page view.
    fn page(&self, name: &str, properties: &Properties);

    /// Records a named event.
    fn track(&self, event: &str, properties: &Properties);
}

/// Errors that can occur while delivering a message over HTTP.
#[derive(Error, Debug)]
pub enum SinkError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// A message was sent before `initialize`.
    #[error("sink used before initialize")]
    NotInitialized,

    /// The app id contains characters not allowed in a header.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Configuration for [`HttpSink`].
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Base URL of the ingestion service, without a trailing slash.
    pub endpoint: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpSinkConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    /// Reads the endpoint from `ASTRONOMER_ENDPOINT`, falling back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        let endpoint = env::var(ENDPOINT_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint)
    }
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

/// Sink posting each call to the ingestion endpoint.
///
/// Each message goes to `<endpoint>/v1/<identify|page|track>`. Sending is
/// handed to the current tokio runtime and never awaited by the tracker; a
/// failed delivery is logged and dropped.
pub struct HttpSink {
    config: HttpSinkConfig,
    client: Client,
    app_id: OnceLock<String>,
}

impl HttpSink {
    /// Creates a new HTTP sink.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Http` if the HTTP client cannot be built.
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            config,
            client,
            app_id: OnceLock::new(),
        })
    }

    /// Returns the app id set by `initialize`, if any.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.get().map(String::as_str)
    }

    /// Builds the message for `kind`, stamped with the initialized app id.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::NotInitialized` before `initialize` has been called.
    pub fn message(&self, kind: MessageKind) -> Result<Message, SinkError> {
        let app_id = self.app_id().ok_or(SinkError::NotInitialized)?;
        Ok(Message::new(app_id, kind))
    }

    /// Sends a single message and waits for the response. No retry.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the request fails or the endpoint answers with a
    /// non-success status.
    pub async fn send(&self, message: &Message) -> Result<(), SinkError> {
        deliver(&self.client, &self.config.endpoint, message).await
    }

    /// Hands `kind` to the runtime without waiting for delivery.
    fn dispatch(&self, kind: MessageKind) {
        let message = match self.message(kind) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping analytics message");
                return;
            }
        };

        let Ok(handle) = Handle::try_current() else {
            warn!(
                kind = message.kind.path(),
                "No async runtime available, dropping analytics message"
            );
            return;
        };

        let client = self.client.clone();
        let endpoint = self.config.endpoint.clone();
        handle.spawn(async move {
            if let Err(e) = deliver(&client, &endpoint, &message).await {
                warn!(
                    error = %e,
                    message_id = %message.message_id,
                    kind = message.kind.path(),
                    "Failed to deliver analytics message"
                );
            }
        });
    }
}

impl AnalyticsSink for HttpSink {
    fn initialize(&self, settings: &Settings) {
        if self.app_id.set(settings.app_id.clone()).is_err() {
            debug!("HTTP sink already initialized");
            return;
        }
        debug!(endpoint = %self.config.endpoint, app_id = %settings.app_id, "HTTP sink initialized");
    }

    fn identify(&self, user_id: Option<&str>, traits: &Traits) {
        self.dispatch(MessageKind::Identify {
            user_id: user_id.map(str::to_string),
            traits: traits.clone(),
        });
    }

    fn page(&self, name: &str, properties: &Properties) {
        self.dispatch(MessageKind::Page {
            name: name.to_string(),
            properties: properties.clone(),
        });
    }

    fn track(&self, event: &str, properties: &Properties) {
        self.dispatch(MessageKind::Track {
            event: event.to_string(),
            properties: properties.clone(),
        });
    }
}

/// Posts one message to its endpoint path.
async fn deliver(client: &Client, endpoint: &str, message: &Message) -> Result<(), SinkError> {
    let url = format!("{endpoint}/v1/{}", message.kind.path());

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(APP_ID_HEADER, HeaderValue::from_str(&message.app_id)?);

    trace!(url = %url, message_id = %message.message_id, "Sending analytics message");

    let response = client.post(&url).headers(headers).json(message).send().await?;
    let status = response.status();

    if status.is_success() {
        trace!(message_id = %message.message_id, "Analytics message accepted");
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(SinkError::ServerError {
        status: status.as_u16(),
        message: body,
    })
}

/// One recorded call on a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Initialize(Settings),
    Identify {
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

/// Sink that records every call in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    calls: Mutex<Vec<SinkCall>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        self.lock().clone()
    }

    /// Returns only the `track` event names, in order.
    #[must_use]
    pub fn tracked_events(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Track { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns only the `page` names, in order.
    #[must_use]
    pub fn page_names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                SinkCall::Page { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SinkCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: SinkCall) {
        self.lock().push(call);
    }
}

impl AnalyticsSink for MemorySink {
    fn initialize(&self, settings: &Settings) {
        self.record(SinkCall::Initialize(settings.clone()));
    }

    fn identify(&self, user_id: Option<&str>, traits: &Traits) {
        self.record(SinkCall::Identify {
            user_id: user_id.map(str::to_string),
            traits: traits.clone(),
        });
    }

    fn page(&self, name: &str, properties: &Properties) {
        self.record(SinkCall::Page {
            name: name.to_string(),
            properties: properties.clone(),
        });
    }

    fn track(&self, event: &str, properties: &Properties) {
        self.record(SinkCall::Track {
            event: event.to_string(),
            properties: properties.clone(),
        });
    }
}
