//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is the
//! embedding application's choice. [`init_tracing`] is a convenience for
//! applications without their own setup.

use channeldb_core::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global fmt subscriber according to `config`.
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns `false` when
/// logging is disabled or another subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.as_str()));

    let json = config.json.then(|| fmt::layer().json());
    let plain = (!config.json).then(|| fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_logging_installs_nothing() {
        assert!(!init_tracing(&LoggingConfig::default()));
    }
}
