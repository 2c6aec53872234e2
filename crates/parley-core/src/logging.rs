//! Tracing subscriber setup for binaries and integration harnesses.

use tracing_subscriber::EnvFilter;

use crate::config::env_vars;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "parley=info";

/// Install the global subscriber.
///
/// Honors `RUST_LOG`, and switches to JSON output when `PARLEY_LOG_JSON`
/// is set. Calling it twice is harmless: the second install is ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(DEFAULT_FILTER).add_directive(tracing::Level::WARN.into())
    });

    let result = if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already installed: {}", e);
    }
}

/// Test-friendly subscriber writing through the libtest capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("parley=debug"))
        .with_test_writer()
        .try_init();
}
