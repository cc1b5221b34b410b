//! Tracing subscriber setup for the binaries.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a console subscriber at `level`. `RUST_LOG`, when set, takes
/// precedence.
///
/// # Errors
///
/// - `TryInitError` - If a global subscriber is already installed
pub fn init(level: Level) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
}
