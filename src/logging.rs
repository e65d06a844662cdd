//! Logging setup.
//!
//! The binding logs through `tracing`. A host that has its own subscriber
//! installed keeps it; otherwise [`init_logging`] installs a registry with
//! an `EnvFilter` and a fmt layer writing to stderr.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when neither `RUST_LOG` nor the configuration sets one.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `filter`. Returns false if a global
/// subscriber was already set, which leaves logging unchanged.
pub fn init_logging(filter: Option<&str>) -> bool {
    let env_filter = select_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), filter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

/// First directive that parses: the environment's, the configured one,
/// then [`DEFAULT_FILTER`].
fn select_filter(from_env: Option<&str>, configured: Option<&str>) -> EnvFilter {
    from_env
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| configured.and_then(|directive| EnvFilter::try_new(directive).ok()))
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
