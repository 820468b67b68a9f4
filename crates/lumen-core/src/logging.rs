//! Structured logging setup.
//!
//! Everything logs through `tracing`. Session context (session ID, script run
//! ID) is attached as span fields via `#[instrument]` at the lifecycle
//! boundaries rather than threaded through call arguments.

use tracing_subscriber::EnvFilter;

/// Default filter directive when neither the caller nor `RUST_LOG` sets one.
pub const DEFAULT_LEVEL: &str = "info";

/// Build the filter: `RUST_LOG` wins, then `level`.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// An unparseable `level` falls back to [`DEFAULT_LEVEL`].
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize a JSON-lines subscriber on stderr, for log shipping.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}
