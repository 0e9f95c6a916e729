//! Terminal logging for simulation runs.
//!
//! `RUST_LOG` takes precedence when set, e.g.
//! `RUST_LOG=queuestation::engine=trace` prints every lifecycle transition.

use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `level` is one of "trace", "debug",
/// "info", "warn" or "error" and applies to this crate only.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level).into());

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .try_init();

    if installed.is_ok() {
        info!("Logging initialized at level: {}", level);
    }
}
