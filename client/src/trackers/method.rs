//! Remote method call tracking.
//!
//! [`CallInterceptor`] wraps the host's [`MethodInvoker`] and exposes the same
//! interface. Callers invoke methods through the interceptor instead of the
//! raw invoker; nothing global is patched.
//!
//! For every call the interceptor installs a completion handler that tracks
//! `Called <name> Method` when, and only when, the call finished without an
//! error. The handler always runs before the caller's own callback, which
//! then receives the original `(error, result)` pair untouched.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use astronomer_client::sink::MemorySink;
//! use astronomer_client::trackers::PayloadPolicy;
//! use astronomer_client::trackers::method::{
//!     instrument, MethodCallback, MethodInvoker, OptionsArg,
//! };
//!
//! /// Invoker that succeeds immediately.
//! struct Echo;
//!
//! impl MethodInvoker for Echo {
//!     fn apply(
//!         &self,
//!         _name: &str,
//!         args: Vec<Value>,
//!         _options: Option<OptionsArg>,
//!         callback: Option<MethodCallback>,
//!     ) -> Option<Value> {
//!         if let Some(callback) = callback {
//!             callback(None, Some(json!(args)));
//!         }
//!         None
//!     }
//! }
//!
//! let sink = Arc::new(MemorySink::new());
//! let invoker = instrument(Arc::new(Echo), sink.clone(), PayloadPolicy::default());
//!
//! invoker.call("posts.insert", vec![json!(1)], None);
//! assert_eq!(sink.tracked_events(), vec!["Called posts.insert Method".to_string()]);
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::Settings;
use crate::sink::AnalyticsSink;
use crate::trackers::PayloadPolicy;
use crate::types::{MethodCallEvent, Properties};

/// Per-call options passed to the invoker.
pub type CallOptions = Map<String, Value>;

/// Callback receiving a method's `(error, result)` once it completes.
pub type MethodCallback = Box<dyn FnOnce(Option<MethodError>, Option<Value>) + Send>;

/// An error returned by a remote method.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error} [{}]", .reason.as_deref().unwrap_or("method failed"))]
pub struct MethodError {
    /// Error code, e.g. `not-authorized` or `500`.
    pub error: Value,

    /// Human readable reason.
    pub reason: Option<String>,

    /// Extra details supplied by the method.
    pub details: Option<Value>,
}

impl MethodError {
    #[must_use]
    pub fn new(error: impl Into<Value>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: Some(reason.into()),
            details: None,
        }
    }
}

/// The argument in the options position.
///
/// Callers may pass a callback where the options belong; the interceptor
/// shifts it into the callback slot.
pub enum OptionsArg {
    Options(CallOptions),
    Callback(MethodCallback),
}

impl fmt::Debug for OptionsArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Options(options) => f.debug_tuple("Options").field(options).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// The single entry point used to invoke remote methods.
pub trait MethodInvoker: Send + Sync {
    /// Invokes method `name` with `args`.
    ///
    /// `callback`, when given, receives `(error, result)` once the call
    /// completes. The return value is whatever the transport returns for the
    /// call (e.g. a synchronous result), passed through untouched.
    fn apply(
        &self,
        name: &str,
        args: Vec<Value>,
        options: Option<OptionsArg>,
        callback: Option<MethodCallback>,
    ) -> Option<Value>;

    /// Callback-style shorthand for [`apply`](Self::apply) without options.
    fn call(&self, name: &str, args: Vec<Value>, callback: Option<MethodCallback>) -> Option<Value> {
        self.apply(name, args, None, callback)
    }

    /// Whether this invoker already tracks calls.
    fn is_instrumented(&self) -> bool {
        false
    }
}

/// Separates options from a callback passed in the options position.
///
/// A callback in the options slot replaces `callback`, and the options become
/// empty. Missing options also become empty.
#[must_use]
pub fn normalize(
    options: Option<OptionsArg>,
    callback: Option<MethodCallback>,
) -> (CallOptions, Option<MethodCallback>) {
    match options {
        Some(OptionsArg::Options(options)) => (options, callback),
        Some(OptionsArg::Callback(shifted)) => (CallOptions::new(), Some(shifted)),
        None => (CallOptions::new(), callback),
    }
}

/// [`MethodInvoker`] that tracks every successful call.
///
/// Holds no state besides the wrapped invoker and its tracking
/// configuration, so nested and repeated calls behave like native ones.
pub struct CallInterceptor {
    inner: Arc<dyn MethodInvoker>,
    sink: Arc<dyn AnalyticsSink>,
    policy: PayloadPolicy,
}

impl CallInterceptor {
    #[must_use]
    pub fn new(
        inner: Arc<dyn MethodInvoker>,
        sink: Arc<dyn AnalyticsSink>,
        policy: PayloadPolicy,
    ) -> Self {
        Self {
            inner,
            sink,
            policy,
        }
    }

    /// Builds the completion handler for one call.
    fn completion(
        &self,
        name: &str,
        args: Option<Vec<Value>>,
    ) -> impl FnOnce(Option<&MethodError>, Option<&Value>) + Send + 'static {
        let event = MethodCallEvent::new(name);
        let sink = Arc::clone(&self.sink);
        let policy = self.policy.clone();

        move |error: Option<&MethodError>, result: Option<&Value>| {
            if let Some(error) = error {
                trace!(method = %event.method_name, error = %error, "Method failed, not tracking");
                return;
            }

            let mut properties = Properties::new();
            if let Some(args) = args {
                properties.insert("args".to_string(), Value::Array(args));
                properties.insert("res".to_string(), result.cloned().unwrap_or(Value::Null));
            }
            policy.decorate(&mut properties);

            sink.track(&event.event_name(), &properties);
        }
    }
}

impl MethodInvoker for CallInterceptor {
    fn apply(
        &self,
        name: &str,
        args: Vec<Value>,
        options: Option<OptionsArg>,
        callback: Option<MethodCallback>,
    ) -> Option<Value> {
        let (options, callback) = normalize(options, callback);

        let payload_args = self.policy.include_call_payloads.then(|| args.clone());
        let complete = self.completion(name, payload_args);

        let wrapped: MethodCallback = match callback {
            Some(original) => Box::new(move |error: Option<MethodError>, result: Option<Value>| {
                complete(error.as_ref(), result.as_ref());
                original(error, result);
            }),
            None => Box::new(move |error: Option<MethodError>, result: Option<Value>| {
                complete(error.as_ref(), result.as_ref());
            }),
        };

        self.inner
            .apply(name, args, Some(OptionsArg::Options(options)), Some(wrapped))
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}

/// Wraps `invoker` with call tracking, unless it already tracks calls.
#[must_use]
pub fn instrument(
    invoker: Arc<dyn MethodInvoker>,
    sink: Arc<dyn AnalyticsSink>,
    policy: PayloadPolicy,
) -> Arc<dyn MethodInvoker> {
    if invoker.is_instrumented() {
        debug!("Method invoker already instrumented");
        return invoker;
    }
    Arc::new(CallInterceptor::new(invoker, sink, policy))
}

/// Starts method tracking if enabled.
///
/// Returns the invoker callers should use: the instrumented one, or `invoker`
/// unchanged when method tracking is disabled.
#[must_use]
pub fn start(
    settings: &Settings,
    invoker: Arc<dyn MethodInvoker>,
    sink: Arc<dyn AnalyticsSink>,
    policy: PayloadPolicy,
) -> Arc<dyn MethodInvoker> {
    if settings.disable_method_tracking {
        debug!("Method tracking disabled");
        return invoker;
    }
    debug!("Installing method tracking");
    instrument(invoker, sink, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SinkCall};
    use crate::trackers::SessionSource;
    use serde_json::json;
    use std::sync::Mutex;

    /// What the fake transport saw for one call.
    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        name: String,
        args: Vec<Value>,
        options: Option<CallOptions>,
        had_callback: bool,
    }

    /// Transport that completes every call with a fixed outcome.
    struct FakeTransport {
        outcome: Result<Value, MethodError>,
        seen: Mutex<Vec<Seen>>,
    }

    impl FakeTransport {
        fn ok(result: Value) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(result),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: MethodError) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(error),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl MethodInvoker for FakeTransport {
        fn apply(
            &self,
            name: &str,
            args: Vec<Value>,
            options: Option<OptionsArg>,
            callback: Option<MethodCallback>,
        ) -> Option<Value> {
            let options = match options {
                Some(OptionsArg::Options(options)) => Some(options),
                Some(OptionsArg::Callback(_)) => panic!("transport received an unshifted callback"),
                None => None,
            };
            self.seen.lock().unwrap().push(Seen {
                name: name.to_string(),
                args,
                options,
                had_callback: callback.is_some(),
            });

            if let Some(callback) = callback {
                match &self.outcome {
                    Ok(result) => callback(None, Some(result.clone())),
                    Err(error) => callback(Some(error.clone()), None),
                }
            }
            Some(json!("return-value"))
        }
    }

    type Received = Arc<Mutex<Vec<(Option<MethodError>, Option<Value>, usize)>>>;

    /// Callback that records what it got and how many events were tracked by then.
    fn recording_callback(sink: Arc<MemorySink>, received: Received) -> MethodCallback {
        Box::new(move |error: Option<MethodError>, result: Option<Value>| {
            let tracked = sink.tracked_events().len();
            received.lock().unwrap().push((error, result, tracked));
        })
    }

    #[test]
    fn success_tracks_once_before_callback() {
        let transport = FakeTransport::ok(json!({ "ok": true }));
        let sink = Arc::new(MemorySink::new());
        let interceptor = CallInterceptor::new(transport.clone(), sink.clone(), PayloadPolicy::default());

        let received: Received = Arc::default();
        interceptor.call(
            "foo",
            vec![json!(1), json!(2)],
            Some(recording_callback(sink.clone(), received.clone())),
        );

        assert_eq!(
            sink.calls(),
            vec![SinkCall::Track {
                event: "Called foo Method".to_string(),
                properties: Properties::new(),
            }]
        );
        assert_eq!(
            *received.lock().unwrap(),
            vec![(None, Some(json!({ "ok": true })), 1)]
        );
    }

    #[test]
    fn error_skips_tracking_and_passes_error_through() {
        let error = MethodError::new("not-authorized", "Must be logged in");
        let transport = FakeTransport::failing(error.clone());
        let sink = Arc::new(MemorySink::new());
        let interceptor = CallInterceptor::new(transport, sink.clone(), PayloadPolicy::default());

        let received: Received = Arc::default();
        interceptor.call(
            "secret",
            vec![],
            Some(recording_callback(sink.clone(), received.clone())),
        );

        assert!(sink.is_empty());
        assert_eq!(*received.lock().unwrap(), vec![(Some(error), None, 0)]);
    }

    #[test]
    fn missing_callback_still_tracks() {
        let transport = FakeTransport::ok(json!(null));
        let sink = Arc::new(MemorySink::new());
        let interceptor = CallInterceptor::new(transport.clone(), sink.clone(), PayloadPolicy::default());

        interceptor.apply("fireAndForget", vec![], None, None);

        assert_eq!(sink.tracked_events(), vec!["Called fireAndForget Method".to_string()]);
        let seen = transport.seen.lock().unwrap();
        assert!(seen[0].had_callback);
        assert_eq!(seen[0].options, Some(CallOptions::new()));
    }

    #[test]
    fn callback_in_options_position_is_shifted() {
        let transport = FakeTransport::ok(json!(5));
        let sink = Arc::new(MemorySink::new());
        let interceptor = CallInterceptor::new(transport.clone(), sink.clone(), PayloadPolicy::default());

        let received: Received = Arc::default();
        interceptor.apply(
            "count",
            vec![],
            Some(OptionsArg::Callback(recording_callback(sink.clone(), received.clone()))),
            None,
        );

        assert_eq!(*received.lock().unwrap(), vec![(None, Some(json!(5)), 1)]);
        assert_eq!(transport.seen.lock().unwrap()[0].options, Some(CallOptions::new()));
    }

    #[test]
    fn options_and_args_reach_transport_unchanged() {
        let transport = FakeTransport::ok(json!(null));
        let sink = Arc::new(MemorySink::new());
        let interceptor = CallInterceptor::new(transport.clone(), sink, PayloadPolicy::default());

        let mut options = CallOptions::new();
        options.insert("wait".to_string(), json!(true));

        let returned = interceptor.apply(
            "posts.update",
            vec![json!("id-1"), json!({ "title": "x" })],
            Some(OptionsArg::Options(options.clone())),
            None,
        );

        assert_eq!(returned, Some(json!("return-value")));
        assert_eq!(
            transport.seen.lock().unwrap()[0],
            Seen {
                name: "posts.update".to_string(),
                args: vec![json!("id-1"), json!({ "title": "x" })],
                options: Some(options),
                had_callback: true,
            }
        );
    }

    #[test]
    fn instrument_is_idempotent() {
        let transport = FakeTransport::ok(json!(1));
        let sink = Arc::new(MemorySink::new());

        let once = instrument(transport, sink.clone(), PayloadPolicy::default());
        let twice = instrument(Arc::clone(&once), sink.clone(), PayloadPolicy::default());
        assert!(Arc::ptr_eq(&once, &twice));

        twice.call("ping", vec![], None);
        assert_eq!(sink.tracked_events().len(), 1);
    }

    #[test]
    fn repeated_calls_track_each_success() {
        let transport = FakeTransport::ok(json!(1));
        let sink = Arc::new(MemorySink::new());
        let invoker = instrument(transport, sink.clone(), PayloadPolicy::default());

        invoker.call("a", vec![], None);
        invoker.call("b", vec![], None);

        assert_eq!(
            sink.tracked_events(),
            vec!["Called a Method".to_string(), "Called b Method".to_string()]
        );
    }

    #[test]
    fn payload_policy_adds_args_and_result() {
        struct Session;
        impl SessionSource for Session {
            fn keys(&self) -> Map<String, Value> {
                let mut keys = Map::new();
                keys.insert("step".to_string(), json!(2));
                keys
            }
        }

        let transport = FakeTransport::ok(json!({ "id": "p1" }));
        let sink = Arc::new(MemorySink::new());
        let policy = PayloadPolicy {
            include_call_payloads: true,
            session: Some(Arc::new(Session)),
        };
        let interceptor = CallInterceptor::new(transport, sink.clone(), policy);

        interceptor.call("posts.insert", vec![json!("hello")], None);

        let calls = sink.calls();
        let SinkCall::Track { properties, .. } = &calls[0] else {
            panic!("expected a track call");
        };
        assert_eq!(
            Value::Object(properties.clone()),
            json!({
                "args": ["hello"],
                "res": { "id": "p1" },
                "session": { "step": 2 }
            })
        );
    }

    #[test]
    fn start_returns_raw_invoker_when_disabled() {
        let transport = FakeTransport::ok(json!(1));
        let mut settings = Settings::new("app");
        settings.disable_method_tracking = true;

        let sink = Arc::new(MemorySink::new());
        let invoker = start(&settings, transport, sink.clone(), PayloadPolicy::default());
        assert!(!invoker.is_instrumented());

        invoker.call("x", vec![], None);
        assert!(sink.is_empty());
    }

    #[test]
    fn method_error_display() {
        let err = MethodError::new(json!(403), "Forbidden");
        assert_eq!(err.to_string(), "403 [Forbidden]");

        let err = MethodError {
            error: json!("boom"),
            reason: None,
            details: None,
        };
        assert_eq!(err.to_string(), "\"boom\" [method failed]");
    }
}
