// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// kudos-core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Maximum number of events handled concurrently (0 = unbounded)
    pub max_in_flight: u32,
    /// Capacity of the inbound event queue
    pub queue_capacity: usize,
    /// Retries after the first attempt for contended storage operations
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff between retries
    pub retry_base_delay: Duration,
    /// Seed the achievement catalog on startup if it is empty
    pub seed_catalog: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KUDOS_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `KUDOS_MAX_IN_FLIGHT`: Concurrent event handlers (default: 64, 0 = unbounded)
    /// - `KUDOS_QUEUE_CAPACITY`: Inbound queue capacity (default: 1024)
    /// - `KUDOS_RETRY_MAX_ATTEMPTS`: Retries for contended storage (default: 3)
    /// - `KUDOS_RETRY_BASE_DELAY_MS`: Backoff base delay (default: 50)
    /// - `KUDOS_SEED_CATALOG`: Seed the catalog at startup (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("KUDOS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("KUDOS_DATABASE_URL"))?;

        let max_in_flight: u32 = std::env::var("KUDOS_MAX_IN_FLIGHT")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("KUDOS_MAX_IN_FLIGHT", "must be a non-negative integer")
            })?;

        let queue_capacity: usize = std::env::var("KUDOS_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "1024".to_string())
            .parse::<usize>()
            .ok()
            .filter(|capacity| *capacity > 0)
            .ok_or(ConfigError::Invalid(
                "KUDOS_QUEUE_CAPACITY",
                "must be a positive integer",
            ))?;

        let retry_max_attempts: u32 = std::env::var("KUDOS_RETRY_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "KUDOS_RETRY_MAX_ATTEMPTS",
                    "must be a non-negative integer",
                )
            })?;

        let retry_base_delay_ms: u64 = std::env::var("KUDOS_RETRY_BASE_DELAY_MS")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "KUDOS_RETRY_BASE_DELAY_MS",
                    "must be a non-negative integer",
                )
            })?;

        let seed_catalog = match std::env::var("KUDOS_SEED_CATALOG")
            .unwrap_or_else(|_| "true".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                return Err(ConfigError::Invalid(
                    "KUDOS_SEED_CATALOG",
                    "must be true or false",
                ));
            }
        };

        Ok(Self {
            database_url,
            max_in_flight,
            queue_capacity,
            retry_max_attempts,
            retry_base_delay: Duration::from_millis(retry_base_delay_ms),
            seed_catalog,
        })
    }

    /// Retry policy for storage operations derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_base_delay)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "KUDOS_DATABASE_URL",
        "KUDOS_MAX_IN_FLIGHT",
        "KUDOS_QUEUE_CAPACITY",
        "KUDOS_RETRY_MAX_ATTEMPTS",
        "KUDOS_RETRY_BASE_DELAY_MS",
        "KUDOS_SEED_CATALOG",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Starts from a clean slate: every kudos variable removed.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for key in ALL_VARS {
                guard.remove(key);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("KUDOS_DATABASE_URL", "postgres://localhost/kudos");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/kudos");
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(50));
        assert!(config.seed_catalog);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("KUDOS_DATABASE_URL", "sqlite:.data/kudos.db");
        guard.set("KUDOS_MAX_IN_FLIGHT", "0");
        guard.set("KUDOS_QUEUE_CAPACITY", "16");
        guard.set("KUDOS_RETRY_MAX_ATTEMPTS", "5");
        guard.set("KUDOS_RETRY_BASE_DELAY_MS", "10");
        guard.set("KUDOS_SEED_CATALOG", "false");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:.data/kudos.db");
        assert_eq!(config.max_in_flight, 0);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.retry_base_delay, Duration::from_millis(10));
        assert!(!config.seed_catalog);

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries(), 5);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("KUDOS_DATABASE_URL")));
        assert!(err.to_string().contains("KUDOS_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_max_in_flight() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("KUDOS_DATABASE_URL", "postgres://localhost/kudos");
        guard.set("KUDOS_MAX_IN_FLIGHT", "-5");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("KUDOS_MAX_IN_FLIGHT", _)));
    }

    #[test]
    fn test_config_zero_queue_capacity_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("KUDOS_DATABASE_URL", "postgres://localhost/kudos");
        guard.set("KUDOS_QUEUE_CAPACITY", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("KUDOS_QUEUE_CAPACITY", _)));
    }

    #[test]
    fn test_config_invalid_seed_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("KUDOS_DATABASE_URL", "postgres://localhost/kudos");
        guard.set("KUDOS_SEED_CATALOG", "sometimes");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("KUDOS_SEED_CATALOG", _)));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
