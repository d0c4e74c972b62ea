//! Logging setup
//!
//! Builds a `tracing` subscriber as a value. The caller decides whether to
//! install it globally (`tracing::subscriber::set_global_default`) or scope
//! it to a closure (`tracing::subscriber::with_default`).

use crate::{config::LoggingConfig, Error, Result};
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;

/// Boxed subscriber ready to install
pub type BoxedSubscriber = Box<dyn Subscriber + Send + Sync + 'static>;

/// Build a fmt subscriber; `RUST_LOG` overrides the configured filter
pub fn subscriber(config: &LoggingConfig) -> Result<BoxedSubscriber> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| Error::Config(format!("log filter {:?}: {}", config.filter, e)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json {
        Ok(Box::new(builder.json().finish()))
    } else {
        Ok(Box::new(builder.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_subscriber() {
        let config = LoggingConfig {
            filter: "debug".to_string(),
            json: true,
        };
        let subscriber = subscriber(&config).unwrap();
        let value = tracing::subscriber::with_default(subscriber, || {
            tracing::info!(user_id = "alice", "scoped log line");
            7
        });
        assert_eq!(value, 7);
    }

    #[test]
    fn test_bad_filter_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            filter: "ledger_core=notalevel".to_string(),
            json: false,
        };
        assert!(matches!(subscriber(&config), Err(Error::Config(_))));
    }
}
