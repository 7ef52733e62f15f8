//! Tracing setup for binaries and test harnesses embedding the library

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::{Error, Result};

/// Install a global fmt subscriber
///
/// `RUST_LOG` wins over `default_level` when set. Fails if a global
/// subscriber is already installed or the level does not parse.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(default_level),
    }
    .map_err(|e| Error::configuration(format!("Invalid log filter: {}", e)))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::internal(format!("Setting default subscriber failed: {}", e)))
}
