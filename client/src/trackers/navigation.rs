//! Route navigation tracking.
//!
//! Two router integration styles are supported, detected once at startup in
//! priority order:
//!
//! 1. **Run hook** ([`RunHookRouter`]): the router calls a hook when a route
//!    is entered and may require the hook to call a continuation before
//!    navigation proceeds.
//! 2. **Enter triggers** ([`TriggerRouter`]): the router calls a list of
//!    triggers with the navigation context.
//!
//! Both are adapted to the [`NavigationSource`] interface, and every
//! navigation becomes one `page(pageName, { routeParams })` call. When no
//! router is present nothing is installed.
//!
//! # Page Names
//!
//! The page name is the route path. A missing, empty or root (`/`) path maps
//! to [`HOME_PAGE_NAME`].
//!
//! ```
//! use astronomer_client::trackers::navigation::page_name;
//!
//! assert_eq!(page_name(Some("/posts/:_id")), "/posts/:_id");
//! assert_eq!(page_name(Some("/")), "Home");
//! assert_eq!(page_name(None), "Home");
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::Settings;
use crate::reactive::Subscription;
use crate::sink::AnalyticsSink;
use crate::trackers::PayloadPolicy;
use crate::types::NavigationEvent;

/// Page name used when a route has no usable path.
pub const HOME_PAGE_NAME: &str = "Home";

/// Route parameters of a navigation.
pub type RouteParams = Map<String, Value>;

/// Where the router is, or is going.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Navigation {
    /// The route's path pattern, e.g. `/posts/:_id`.
    pub path: Option<String>,
    pub params: RouteParams,
}

impl Navigation {
    #[must_use]
    pub fn new(path: impl Into<String>, params: RouteParams) -> Self {
        Self {
            path: Some(path.into()),
            params,
        }
    }
}

/// Continuation a run hook must call for navigation to proceed.
pub type Continuation = Box<dyn FnOnce() + Send>;

/// Context handed to a run hook.
pub struct RunContext {
    navigation: Navigation,
    next: Option<Continuation>,
}

impl RunContext {
    #[must_use]
    pub fn new(navigation: Navigation) -> Self {
        Self {
            navigation,
            next: None,
        }
    }

    /// Attaches the router's continuation.
    #[must_use]
    pub fn with_next(mut self, next: impl FnOnce() + Send + 'static) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    #[must_use]
    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    /// Whether a continuation is still pending.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Calls the continuation, if the router supplied one. Later calls do nothing.
    pub fn next(&mut self) {
        if let Some(next) = self.next.take() {
            next();
        }
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("navigation", &self.navigation)
            .field("has_next", &self.has_next())
            .finish()
    }
}

/// Hook called by a [`RunHookRouter`] whenever a route is entered.
pub type RunHook = Arc<dyn Fn(&mut RunContext) + Send + Sync>;

/// Trigger called by a [`TriggerRouter`] on every enter.
pub type EnterTrigger = Arc<dyn Fn(&Navigation) + Send + Sync>;

/// Handler receiving every navigation from a [`NavigationSource`].
pub type NavigateHandler = Arc<dyn Fn(&Navigation) + Send + Sync>;

/// Router exposing a "route entered" hook with a continuation.
pub trait RunHookRouter: Send + Sync {
    /// The current route, if any.
    fn current(&self) -> Option<Navigation>;

    /// Registers `hook` to run whenever a route is entered.
    fn on_run(&self, hook: RunHook) -> Subscription;
}

/// Router exposing a list of enter triggers.
pub trait TriggerRouter: Send + Sync {
    /// The current route, if any.
    fn current(&self) -> Option<Navigation>;

    /// Registers `triggers` to run on every enter.
    fn triggers_enter(&self, triggers: Vec<EnterTrigger>) -> Subscription;
}

/// A router integration reduced to what navigation tracking needs.
pub trait NavigationSource: Send + Sync {
    /// Short name of the integration, for logs.
    fn name(&self) -> &'static str;

    fn current_path(&self) -> Option<String>;

    fn current_params(&self) -> RouteParams;

    /// Registers `handler` for every navigation.
    fn on_navigate(&self, handler: NavigateHandler) -> Subscription;
}

/// [`NavigationSource`] over a [`RunHookRouter`].
pub struct RunHookSource {
    router: Arc<dyn RunHookRouter>,
}

impl RunHookSource {
    #[must_use]
    pub fn new(router: Arc<dyn RunHookRouter>) -> Self {
        Self { router }
    }
}

impl NavigationSource for RunHookSource {
    fn name(&self) -> &'static str {
        "run-hook"
    }

    fn current_path(&self) -> Option<String> {
        self.router.current().and_then(|nav| nav.path)
    }

    fn current_params(&self) -> RouteParams {
        self.router.current().map(|nav| nav.params).unwrap_or_default()
    }

    fn on_navigate(&self, handler: NavigateHandler) -> Subscription {
        self.router.on_run(Arc::new(move |ctx: &mut RunContext| {
            handler(ctx.navigation());
            // Older routers pass no continuation.
            ctx.next();
        }))
    }
}

/// [`NavigationSource`] over a [`TriggerRouter`].
pub struct EnterTriggerSource {
    router: Arc<dyn TriggerRouter>,
}

impl EnterTriggerSource {
    #[must_use]
    pub fn new(router: Arc<dyn TriggerRouter>) -> Self {
        Self { router }
    }
}

impl NavigationSource for EnterTriggerSource {
    fn name(&self) -> &'static str {
        "enter-trigger"
    }

    fn current_path(&self) -> Option<String> {
        self.router.current().and_then(|nav| nav.path)
    }

    fn current_params(&self) -> RouteParams {
        self.router.current().map(|nav| nav.params).unwrap_or_default()
    }

    fn on_navigate(&self, handler: NavigateHandler) -> Subscription {
        let trigger: EnterTrigger = Arc::new(move |nav: &Navigation| handler(nav));
        self.router.triggers_enter(vec![trigger])
    }
}

/// The router integrations the host has installed.
#[derive(Clone, Default)]
pub struct Routers {
    pub run_hook: Option<Arc<dyn RunHookRouter>>,
    pub enter_trigger: Option<Arc<dyn TriggerRouter>>,
}

impl Routers {
    /// Picks the first available integration, run hook first.
    #[must_use]
    pub fn select(&self) -> Option<Box<dyn NavigationSource>> {
        if let Some(router) = &self.run_hook {
            return Some(Box::new(RunHookSource::new(Arc::clone(router))));
        }
        if let Some(router) = &self.enter_trigger {
            return Some(Box::new(EnterTriggerSource::new(Arc::clone(router))));
        }
        None
    }
}

/// Derives the page name from a route path.
#[must_use]
pub fn page_name(path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() && path != "/" => path.to_string(),
        _ => HOME_PAGE_NAME.to_string(),
    }
}

/// Turns navigations into page views.
pub struct NavigationTracker {
    sink: Arc<dyn AnalyticsSink>,
    policy: PayloadPolicy,
}

impl NavigationTracker {
    #[must_use]
    pub fn new(sink: Arc<dyn AnalyticsSink>, policy: PayloadPolicy) -> Self {
        Self { sink, policy }
    }

    /// Builds the page view for `navigation`.
    #[must_use]
    pub fn event(&self, navigation: &Navigation) -> NavigationEvent {
        let mut event = NavigationEvent::new(
            page_name(navigation.path.as_deref()),
            navigation.params.clone(),
        );
        self.policy.decorate(&mut event.properties);
        event
    }

    /// Sends one page view for `navigation`.
    pub fn page(&self, navigation: &Navigation) {
        let event = self.event(navigation);
        trace!(page = %event.page_name, "Tracking page view");
        self.sink.page(&event.page_name, &event.properties);
    }

    /// Hooks this tracker into `source`.
    pub fn attach(self, source: &dyn NavigationSource) -> Subscription {
        debug!(router = source.name(), "Installing route tracking");
        let tracker = Arc::new(self);
        source.on_navigate(Arc::new(move |nav: &Navigation| tracker.page(nav)))
    }
}

/// Starts route tracking if enabled and a router is present.
///
/// Returns `None` when route tracking is disabled or no supported router is
/// installed. Neither case is an error.
pub fn start(
    settings: &Settings,
    routers: &Routers,
    sink: Arc<dyn AnalyticsSink>,
    policy: PayloadPolicy,
) -> Option<Subscription> {
    if settings.disable_route_tracking {
        debug!("Route tracking disabled");
        return None;
    }

    let Some(source) = routers.select() else {
        debug!("No supported router detected, route tracking not installed");
        return None;
    };

    Some(NavigationTracker::new(sink, policy).attach(source.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SinkCall};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Run-hook router that stores hooks and fires them on `go`.
    #[derive(Default)]
    struct FakeRunRouter {
        hooks: Mutex<Vec<RunHook>>,
        current: Mutex<Option<Navigation>>,
    }

    impl FakeRunRouter {
        /// Enters a route without a continuation, like older routers do.
        fn go(&self, navigation: Navigation) {
            *self.current.lock().unwrap() = Some(navigation.clone());
            let hooks = self.hooks.lock().unwrap().clone();
            for hook in hooks {
                hook(&mut RunContext::new(navigation.clone()));
            }
        }
    }

    impl RunHookRouter for FakeRunRouter {
        fn current(&self) -> Option<Navigation> {
            self.current.lock().unwrap().clone()
        }

        fn on_run(&self, hook: RunHook) -> Subscription {
            self.hooks.lock().unwrap().push(hook);
            Subscription::noop()
        }
    }

    #[derive(Default)]
    struct FakeTriggerRouter {
        triggers: Mutex<Vec<EnterTrigger>>,
    }

    impl FakeTriggerRouter {
        fn go(&self, navigation: Navigation) {
            let triggers = self.triggers.lock().unwrap().clone();
            for trigger in triggers {
                trigger(&navigation);
            }
        }
    }

    impl TriggerRouter for FakeTriggerRouter {
        fn current(&self) -> Option<Navigation> {
            None
        }

        fn triggers_enter(&self, triggers: Vec<EnterTrigger>) -> Subscription {
            self.triggers.lock().unwrap().extend(triggers);
            Subscription::noop()
        }
    }

    fn params(pairs: &[(&str, &str)]) -> RouteParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn page_name_fallbacks() {
        assert_eq!(page_name(None), "Home");
        assert_eq!(page_name(Some("")), "Home");
        assert_eq!(page_name(Some("/")), "Home");
        assert_eq!(page_name(Some("/about")), "/about");
    }

    #[test]
    fn run_context_next_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut ctx = RunContext::new(Navigation::default()).with_next(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(ctx.has_next());
        ctx.next();
        ctx.next();
        assert!(!ctx.has_next());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_hook_pages_and_calls_continuation() {
        let router = Arc::new(FakeRunRouter::default());
        let sink = Arc::new(MemorySink::new());
        let routers = Routers {
            run_hook: Some(router.clone()),
            enter_trigger: None,
        };

        let _sub = start(&Settings::new("app"), &routers, sink.clone(), PayloadPolicy::default());

        let continued = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&continued);
        let hooks = router.hooks.lock().unwrap().clone();
        let mut ctx = RunContext::new(Navigation::new("/posts/:_id", params(&[("_id", "7")])))
            .with_next(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        hooks[0](&mut ctx);

        assert_eq!(continued.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Page {
                name: "/posts/:_id".to_string(),
                properties: json!({ "routeParams": { "_id": "7" } })
                    .as_object()
                    .cloned()
                    .unwrap(),
            }]
        );
    }

    #[test]
    fn run_hook_without_continuation_still_pages() {
        let router = Arc::new(FakeRunRouter::default());
        let sink = Arc::new(MemorySink::new());
        let routers = Routers {
            run_hook: Some(router.clone()),
            enter_trigger: None,
        };

        let _sub = start(&Settings::new("app"), &routers, sink.clone(), PayloadPolicy::default());
        router.go(Navigation::new("/", RouteParams::new()));

        assert_eq!(sink.page_names(), vec!["Home".to_string()]);
    }

    #[test]
    fn trigger_router_pages() {
        let router = Arc::new(FakeTriggerRouter::default());
        let sink = Arc::new(MemorySink::new());
        let routers = Routers {
            run_hook: None,
            enter_trigger: Some(router.clone()),
        };

        let _sub = start(&Settings::new("app"), &routers, sink.clone(), PayloadPolicy::default());
        router.go(Navigation::new("/users/:id", params(&[("id", "ada")])));
        router.go(Navigation {
            path: None,
            params: RouteParams::new(),
        });

        assert_eq!(
            sink.page_names(),
            vec!["/users/:id".to_string(), "Home".to_string()]
        );
    }

    #[test]
    fn run_hook_is_preferred_over_triggers() {
        let run = Arc::new(FakeRunRouter::default());
        let triggers = Arc::new(FakeTriggerRouter::default());
        let routers = Routers {
            run_hook: Some(run.clone()),
            enter_trigger: Some(triggers.clone()),
        };

        let source = routers.select().expect("a router is present");
        assert_eq!(source.name(), "run-hook");

        let sink = Arc::new(MemorySink::new());
        let _sub = start(&Settings::new("app"), &routers, sink, PayloadPolicy::default());
        assert_eq!(run.hooks.lock().unwrap().len(), 1);
        assert!(triggers.triggers.lock().unwrap().is_empty());
    }

    #[test]
    fn no_router_installs_nothing() {
        let sink = Arc::new(MemorySink::new());
        let subscription = start(
            &Settings::new("app"),
            &Routers::default(),
            sink.clone(),
            PayloadPolicy::default(),
        );
        assert!(subscription.is_none());
        assert!(sink.is_empty());
    }

    #[test]
    fn disabled_route_tracking_installs_nothing() {
        let router = Arc::new(FakeTriggerRouter::default());
        let routers = Routers {
            run_hook: None,
            enter_trigger: Some(router.clone()),
        };
        let mut settings = Settings::new("app");
        settings.disable_route_tracking = true;

        let sink = Arc::new(MemorySink::new());
        assert!(start(&settings, &routers, sink, PayloadPolicy::default()).is_none());
        assert!(router.triggers.lock().unwrap().is_empty());
    }

    #[test]
    fn include_session_adds_session_beside_route_params() {
        struct StepSession;

        impl crate::trackers::SessionSource for StepSession {
            fn keys(&self) -> serde_json::Map<String, Value> {
                json!({ "step": 2 }).as_object().cloned().unwrap()
            }
        }

        let mut settings = Settings::new("app");
        settings.include_session = true;
        let policy = PayloadPolicy::from_settings(&settings, Some(Arc::new(StepSession)));

        let router = Arc::new(FakeRunRouter::default());
        let sink = Arc::new(MemorySink::new());
        let routers = Routers {
            run_hook: Some(router.clone()),
            enter_trigger: None,
        };

        let _sub = start(&settings, &routers, sink.clone(), policy);
        router.go(Navigation::new("/cart", params(&[("id", "9")])));

        assert_eq!(
            sink.calls(),
            vec![SinkCall::Page {
                name: "/cart".to_string(),
                properties: json!({
                    "routeParams": { "id": "9" },
                    "session": { "step": 2 }
                })
                .as_object()
                .cloned()
                .unwrap(),
            }]
        );
    }

    #[test]
    fn source_reads_current_route() {
        let router = Arc::new(FakeRunRouter::default());
        let source = RunHookSource::new(router.clone());
        assert_eq!(source.current_path(), None);
        assert!(source.current_params().is_empty());

        router.go(Navigation::new("/a", params(&[("x", "1")])));
        assert_eq!(source.current_path(), Some("/a".to_string()));
        assert_eq!(source.current_params(), params(&[("x", "1")]));
    }
}
