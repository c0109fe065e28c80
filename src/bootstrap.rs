//! Shared process start-up for every `src/bin/*.rs` consumer: load the
//! one `NldsConfig` document and initialise `tracing` from its
//! `logging` section. Mirrors the `tracing_subscriber::fmt::try_init()`
//! call each of `commy`'s binaries makes inline, pulled out once here
//! since every NLDS consumer binary repeats it identically.

use crate::config::{ConfigBuilder, LoggingConfig, NldsConfig};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Load configuration from the path in `NLDS_CONFIG`, if set, otherwise
/// fall back to documented defaults (spec §9 "Global state": one
/// config, loaded once, immutable thereafter).
pub fn load_config() -> Result<NldsConfig> {
    match std::env::var("NLDS_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        Err(_) => ConfigBuilder::new().build(),
    }
}

/// Install a `tracing-subscriber` fmt layer at the configured level,
/// JSON-formatted when `logging.json` is set. Idempotent: a second
/// binary-under-test calling this in the same process is a no-op.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if logging.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
}
