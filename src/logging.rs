//! Tracing subscriber setup for the CLI and server.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `default_filter` applies unless `RUST_LOG` is set. Calling this twice is
/// harmless; the second install is ignored.
pub fn init(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
