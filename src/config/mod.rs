use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    pub environment: Environment,
    pub dispatch: DispatchConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Convert callback panics into reported failures
    pub catch_panics: bool,
    /// Warn when one callback invocation runs longer than this
    pub slow_callback_ms: u64,
    /// Log operation kinds and ids handed to each callback
    pub log_payloads: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Build previous-state snapshots for updates
    pub reconstruct_previous: bool,
    /// Reject an update whose snapshot cannot be built instead of recording it without one
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing directive when RUST_LOG is unset
    pub filter: String,
}

impl ObserverConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Dispatch overrides
        if let Ok(v) = env::var("TX_HOOKS_CATCH_PANICS") {
            self.dispatch.catch_panics = v.parse().unwrap_or(self.dispatch.catch_panics);
        }
        if let Ok(v) = env::var("TX_HOOKS_SLOW_CALLBACK_MS") {
            self.dispatch.slow_callback_ms = v.parse().unwrap_or(self.dispatch.slow_callback_ms);
        }
        if let Ok(v) = env::var("TX_HOOKS_LOG_PAYLOADS") {
            self.dispatch.log_payloads = v.parse().unwrap_or(self.dispatch.log_payloads);
        }

        // Snapshot overrides
        if let Ok(v) = env::var("TX_HOOKS_RECONSTRUCT_PREVIOUS") {
            self.snapshot.reconstruct_previous = v.parse().unwrap_or(self.snapshot.reconstruct_previous);
        }
        if let Ok(v) = env::var("TX_HOOKS_STRICT_SNAPSHOTS") {
            self.snapshot.strict = v.parse().unwrap_or(self.snapshot.strict);
        }

        // Logging overrides
        if let Ok(v) = env::var("TX_HOOKS_LOG_FILTER") {
            if !v.trim().is_empty() {
                self.logging.filter = v;
            }
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            dispatch: DispatchConfig {
                catch_panics: true,
                slow_callback_ms: 50,
                log_payloads: true,
            },
            snapshot: SnapshotConfig {
                reconstruct_previous: true,
                strict: false,
            },
            logging: LoggingConfig {
                filter: "monk_tx_hooks=debug".to_string(),
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            dispatch: DispatchConfig {
                catch_panics: true,
                slow_callback_ms: 200,
                log_payloads: false,
            },
            snapshot: SnapshotConfig {
                reconstruct_previous: true,
                strict: false,
            },
            logging: LoggingConfig {
                filter: "monk_tx_hooks=info".to_string(),
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            dispatch: DispatchConfig {
                catch_panics: true,
                slow_callback_ms: 500,
                log_payloads: false,
            },
            snapshot: SnapshotConfig {
                reconstruct_previous: true,
                strict: false,
            },
            logging: LoggingConfig {
                filter: "monk_tx_hooks=warn".to_string(),
            },
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self::development()
    }
}

// Global singleton config - initialized once on first use
pub static CONFIG: Lazy<ObserverConfig> = Lazy::new(ObserverConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static ObserverConfig {
    &CONFIG
}

// Helper macros for common checks
#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = ObserverConfig::development();
        assert!(config.dispatch.catch_panics);
        assert!(config.dispatch.log_payloads);
        assert!(!config.snapshot.strict);
    }

    #[test]
    fn test_default_production_config() {
        let config = ObserverConfig::production();
        assert!(config.dispatch.catch_panics);
        assert!(!config.dispatch.log_payloads);
        assert_eq!(config.dispatch.slow_callback_ms, 500);
    }

    #[test]
    fn test_env_overrides_fall_back_on_bad_values() {
        std::env::set_var("TX_HOOKS_SLOW_CALLBACK_MS", "not-a-number");
        std::env::set_var("TX_HOOKS_LOG_PAYLOADS", "true");
        let config = ObserverConfig::staging().with_env_overrides();
        std::env::remove_var("TX_HOOKS_SLOW_CALLBACK_MS");
        std::env::remove_var("TX_HOOKS_LOG_PAYLOADS");

        assert_eq!(config.dispatch.slow_callback_ms, 200);
        assert!(config.dispatch.log_payloads);
    }
}
