//! Logging setup.
//!
//! Diagnostics are emitted through `tracing`. Hosts that do not install a
//! subscriber of their own can call [`init_logging`].

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// With `json` set, log lines are emitted as JSON objects. Returns `false` if
/// a global subscriber was already installed, in which case nothing changes.
pub fn init_logging(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.is_ok()
}
