//! # Controller Configuration
//!
//! Operator-level settings loaded from environment variables.

use std::time::Duration;

/// Operator-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
/// In-cluster the variables come from a ConfigMap through `envFrom`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base URL of the manifest generator / config validator service
    pub generator_url: String,
    /// Timeout of one generator or validator call (seconds)
    pub generator_timeout_secs: u64,
    /// Timeout of one secret backend call (seconds)
    pub secret_backend_timeout_secs: u64,
    /// Public port of exposed services when the resource names none
    pub default_expose_port: i32,
    /// Requeue interval once a resource is converged (seconds)
    pub converged_requeue_secs: u64,
    /// Requeue interval while services are still rolling out (seconds)
    pub rollout_requeue_secs: u64,
    /// Fibonacci backoff lower bound (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff upper bound (seconds)
    pub backoff_max_secs: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Call the config validator before deploying
    pub validation_enabled: bool,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            generator_url: DEFAULT_GENERATOR_URL.to_string(),
            generator_timeout_secs: DEFAULT_GENERATOR_TIMEOUT_SECS,
            secret_backend_timeout_secs: DEFAULT_SECRET_BACKEND_TIMEOUT_SECS,
            default_expose_port: DEFAULT_EXPOSE_PORT,
            converged_requeue_secs: DEFAULT_CONVERGED_REQUEUE_SECS,
            rollout_requeue_secs: DEFAULT_ROLLOUT_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
            validation_enabled: true,
            log_level: "INFO".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            generator_url: env_var_or_default_str("GENERATOR_URL", DEFAULT_GENERATOR_URL),
            generator_timeout_secs: env_var_or_default(
                "GENERATOR_TIMEOUT_SECS",
                DEFAULT_GENERATOR_TIMEOUT_SECS,
            ),
            secret_backend_timeout_secs: env_var_or_default(
                "SECRET_BACKEND_TIMEOUT_SECS",
                DEFAULT_SECRET_BACKEND_TIMEOUT_SECS,
            ),
            default_expose_port: env_var_or_default("DEFAULT_EXPOSE_PORT", DEFAULT_EXPOSE_PORT),
            converged_requeue_secs: env_var_or_default(
                "CONVERGED_REQUEUE_SECS",
                DEFAULT_CONVERGED_REQUEUE_SECS,
            ),
            rollout_requeue_secs: env_var_or_default(
                "ROLLOUT_REQUEUE_SECS",
                DEFAULT_ROLLOUT_REQUEUE_SECS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty()),
            validation_enabled: env_var_or_default_bool("VALIDATION_ENABLED", true),
            log_level: env_var_or_default_str("LOG_LEVEL", "INFO"),
        }
    }

    #[must_use]
    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    #[must_use]
    pub fn secret_backend_timeout(&self) -> Duration {
        Duration::from_secs(self.secret_backend_timeout_secs)
    }

    #[must_use]
    pub fn converged_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.converged_requeue_secs)
    }

    #[must_use]
    pub fn rollout_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.rollout_requeue_secs)
    }

    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        std::env::set_var("SPINNAKER_OPERATOR_TEST_PORT", "not-a-port");
        assert_eq!(env_var_or_default("SPINNAKER_OPERATOR_TEST_PORT", 80_i32), 80);
        std::env::set_var("SPINNAKER_OPERATOR_TEST_PORT", "8080");
        assert_eq!(env_var_or_default("SPINNAKER_OPERATOR_TEST_PORT", 80_i32), 8080);
        std::env::remove_var("SPINNAKER_OPERATOR_TEST_PORT");
    }

    #[test]
    fn booleans_accept_common_spellings() {
        for (raw, expected) in [("yes", true), ("ON", true), ("1", true), ("off", false)] {
            std::env::set_var("SPINNAKER_OPERATOR_TEST_FLAG", raw);
            assert_eq!(env_var_or_default_bool("SPINNAKER_OPERATOR_TEST_FLAG", !expected), expected);
        }
        std::env::remove_var("SPINNAKER_OPERATOR_TEST_FLAG");
        assert!(env_var_or_default_bool("SPINNAKER_OPERATOR_TEST_FLAG", true));
    }

    #[test]
    fn defaults_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.default_expose_port, 80);
        assert_eq!(config.converged_requeue_duration(), Duration::from_secs(300));
        assert!(config.watch_namespace.is_none());
    }
}
