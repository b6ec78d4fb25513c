//! Startup wiring.
//!
//! [`Instrumentation::start`] runs once per process: it initializes the sink
//! and installs each tracker the settings enable and the [`Host`] supports.
//! Calling it again returns the tracking already installed; nothing is
//! wrapped or subscribed twice.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use astronomer_client::config::{Resolution, Settings};
//! use astronomer_client::sink::MemorySink;
//! use astronomer_client::startup::{Host, Instrumentation};
//!
//! let sink = Arc::new(MemorySink::new());
//! let host = Host::new(sink.clone());
//! let instrumentation = Instrumentation::new();
//!
//! let resolution = Resolution::Enabled(Settings::new("app-1"));
//! let active = instrumentation.start(&resolution, &host).expect("enabled");
//! assert_eq!(active.settings().app_id, "app-1");
//!
//! // Idempotent: the sink is initialized only once.
//! instrumentation.start(&resolution, &host);
//! assert_eq!(sink.len(), 1);
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::config::{Resolution, Settings};
use crate::error::Result;
use crate::reactive::Subscription;
use crate::sink::{AnalyticsSink, HttpSink, HttpSinkConfig};
use crate::trackers::identity::{self, Accounts};
use crate::trackers::method::{self, MethodInvoker};
use crate::trackers::navigation::{self, Routers, RunHookRouter, TriggerRouter};
use crate::trackers::{PayloadPolicy, SessionSource};

/// Everything the host framework provides to the trackers.
///
/// Each optional field doubles as a feature flag: a missing capability turns
/// the corresponding tracker off.
#[derive(Clone)]
pub struct Host {
    pub sink: Arc<dyn AnalyticsSink>,
    pub accounts: Option<Accounts>,
    pub routers: Routers,
    pub invoker: Option<Arc<dyn MethodInvoker>>,
    pub session: Option<Arc<dyn SessionSource>>,
}

impl Host {
    /// A host with only a sink and no framework capabilities.
    #[must_use]
    pub fn new(sink: Arc<dyn AnalyticsSink>) -> Self {
        Self {
            sink,
            accounts: None,
            routers: Routers::default(),
            invoker: None,
            session: None,
        }
    }

    /// A host delivering to the HTTP endpoint configured in the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_http_sink() -> Result<Self> {
        let sink = HttpSink::new(HttpSinkConfig::from_env())?;
        Ok(Self::new(Arc::new(sink)))
    }

    #[must_use]
    pub fn with_accounts(mut self, accounts: Accounts) -> Self {
        self.accounts = Some(accounts);
        self
    }

    #[must_use]
    pub fn with_run_hook_router(mut self, router: Arc<dyn RunHookRouter>) -> Self {
        self.routers.run_hook = Some(router);
        self
    }

    #[must_use]
    pub fn with_trigger_router(mut self, router: Arc<dyn TriggerRouter>) -> Self {
        self.routers.enter_trigger = Some(router);
        self
    }

    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn MethodInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: Arc<dyn SessionSource>) -> Self {
        self.session = Some(session);
        self
    }
}

/// Trackers installed by a successful start.
///
/// Dropping this value unsubscribes the identity and route hooks; keep it for
/// the lifetime of the application.
pub struct ActiveTracking {
    settings: Settings,
    identity: Option<Subscription>,
    navigation: Option<Subscription>,
    invoker: Option<Arc<dyn MethodInvoker>>,
}

impl ActiveTracking {
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The invoker callers should use for remote methods.
    ///
    /// Instrumented unless method tracking is disabled; `None` when the host
    /// provided no invoker.
    #[must_use]
    pub fn invoker(&self) -> Option<Arc<dyn MethodInvoker>> {
        self.invoker.clone()
    }

    #[must_use]
    pub fn is_identity_tracking(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn is_route_tracking(&self) -> bool {
        self.navigation.is_some()
    }

    #[must_use]
    pub fn is_method_tracking(&self) -> bool {
        self.invoker
            .as_ref()
            .is_some_and(|invoker| invoker.is_instrumented())
    }
}

impl fmt::Debug for ActiveTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTracking")
            .field("app_id", &self.settings.app_id)
            .field("identity", &self.is_identity_tracking())
            .field("navigation", &self.is_route_tracking())
            .field("method", &self.is_method_tracking())
            .finish()
    }
}

/// Install-once guard for tracking.
#[derive(Debug, Default)]
pub struct Instrumentation {
    active: OnceLock<ActiveTracking>,
}

impl Instrumentation {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: OnceLock::new(),
        }
    }

    /// The process-wide instance.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: Instrumentation = Instrumentation::new();
        &GLOBAL
    }

    /// Installs tracking for `resolution` on `host`.
    ///
    /// Returns `None` without touching the host when tracking is disabled.
    /// Once tracking has been installed, later calls return it unchanged.
    pub fn start(&self, resolution: &Resolution, host: &Host) -> Option<&ActiveTracking> {
        let Resolution::Enabled(settings) = resolution else {
            return self.active.get();
        };

        if let Some(active) = self.active.get() {
            debug!("Tracking already started");
            return Some(active);
        }

        Some(self.active.get_or_init(|| install(settings, host)))
    }

    /// Resolves settings from the environment, then starts.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings variable holds malformed JSON.
    pub fn start_from_env(&self, host: &Host) -> Result<Option<&ActiveTracking>> {
        let resolution = Resolution::from_env()?;
        Ok(self.start(&resolution, host))
    }

    #[must_use]
    pub fn active(&self) -> Option<&ActiveTracking> {
        self.active.get()
    }
}

fn install(settings: &Settings, host: &Host) -> ActiveTracking {
    info!(app_id = %settings.app_id, "Starting Astronomer tracking");
    host.sink.initialize(settings);

    let policy = PayloadPolicy::from_settings(settings, host.session.clone());

    let identity = identity::start(settings, host.accounts.as_ref(), Arc::clone(&host.sink));
    let navigation = navigation::start(
        settings,
        &host.routers,
        Arc::clone(&host.sink),
        policy.clone(),
    );
    let invoker = host
        .invoker
        .clone()
        .map(|invoker| method::start(settings, invoker, Arc::clone(&host.sink), policy));

    let active = ActiveTracking {
        settings: settings.clone(),
        identity,
        navigation,
        invoker,
    };
    debug!(tracking = ?active, "Tracking installed");
    active
}
