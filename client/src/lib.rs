//! Astronomer Client - automatic analytics instrumentation.
//!
//! This crate wires an analytics sink into the extension points a Meteor-style
//! host exposes, so an application gets tracking without calling the
//! analytics API itself:
//! - Identifying the current user whenever the account document changes
//! - Recording a page view for every route navigation
//! - Recording an event for every successful remote method call
//!
//! # Architecture
//!
//! Host capabilities (accounts, routers, the method transport, the session)
//! are passed in as trait objects on a [`Host`]. A missing capability
//! disables the matching tracker instead of failing. [`Instrumentation`]
//! installs everything once per process.
//!
//! # Modules
//!
//! - [`config`]: Settings resolution from override and application settings
//! - [`types`]: Tracking payloads and the wire message format
//! - [`sink`]: The analytics sink trait with HTTP and in-memory sinks
//! - [`reactive`]: Observable values and subscriptions
//! - [`trackers`]: Identity, navigation and method trackers
//! - [`startup`]: One-shot installation of all trackers
//! - [`logging`]: `tracing` subscriber setup
//! - [`error`]: Error types for setup

pub mod config;
pub mod error;
pub mod logging;
pub mod reactive;
pub mod sink;
pub mod startup;
pub mod trackers;
pub mod types;

pub use config::{resolve, ConfigError, Resolution, Settings};
pub use error::{AstronomerError, Result};
pub use reactive::{Observable, ReactiveVar, Subscription};
pub use sink::{AnalyticsSink, HttpSink, HttpSinkConfig, MemorySink, SinkError};
pub use startup::{ActiveTracking, Host, Instrumentation};
pub use types::{Message, MessageKind, Properties, Traits};
