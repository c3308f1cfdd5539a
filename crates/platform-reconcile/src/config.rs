//! Reconciler configuration.
//!
//! Provides the platform endpoint, credentials, timeouts and run options.
//! Configuration is loaded from environment variables with sensible defaults
//! for local development, and is immutable for the duration of a run.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::client::ClientPolicies;
use crate::processor::ProcessorOptions;
use crate::validator::ValidatorOptions;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Platform API endpoint.
    pub api: ServiceEndpoint,

    /// Per-request timeout in seconds.
    pub default_timeout_secs: u64,

    /// Maximum attempts per remote call.
    pub max_retries: u32,

    /// Whether to verify TLS certificates (disable only for testing).
    pub verify_tls: bool,

    /// Validate everything but skip write calls.
    pub dry_run: bool,

    /// Treat an existing role binding of the same name and role as an update
    /// target instead of a conflict.
    pub update_existing: bool,
}

impl Default for ReconcileConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            api: ServiceEndpoint {
                base_url: "http://localhost:8080".to_string(),
                api_key: None,
            },
            default_timeout_secs: 30,
            max_retries: 3,
            verify_tls: true,
            dry_run: false,
            update_existing: false,
        }
    }
}

impl ReconcileConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PLATFORM_API_URL`: Platform API URL (default: http://localhost:8080)
    /// - `PLATFORM_API_TOKEN`: Bearer token for the platform API
    /// - `PLATFORM_TIMEOUT_SECS`: Request timeout in seconds (default: 30)
    /// - `PLATFORM_MAX_RETRIES`: Maximum attempts per call (default: 3)
    /// - `PLATFORM_VERIFY_TLS`: Whether to verify TLS (default: true)
    /// - `PLATFORM_DRY_RUN`: Skip write calls (default: false)
    /// - `PLATFORM_UPDATE_EXISTING`: Update same-name role bindings (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let flag = |key: &str, fallback: bool| {
            lookup(key)
                .map(|s| {
                    let s = s.trim().to_lowercase();
                    s != "false" && s != "0" && !s.is_empty()
                })
                .unwrap_or(fallback)
        };

        Self {
            api: ServiceEndpoint {
                base_url: lookup("PLATFORM_API_URL").unwrap_or(default.api.base_url),
                api_key: lookup("PLATFORM_API_TOKEN").filter(|s| !s.is_empty()),
            },
            default_timeout_secs: lookup("PLATFORM_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.default_timeout_secs),
            max_retries: lookup("PLATFORM_MAX_RETRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_retries),
            verify_tls: flag("PLATFORM_VERIFY_TLS", default.verify_tls),
            dry_run: flag("PLATFORM_DRY_RUN", default.dry_run),
            update_existing: flag("PLATFORM_UPDATE_EXISTING", default.update_existing),
        }
    }

    /// Get the request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Retry policies with the configured attempt budget.
    pub fn client_policies(&self) -> ClientPolicies {
        ClientPolicies::default().with_max_attempts(self.max_retries)
    }

    /// Processor options derived from this configuration.
    pub fn processor_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            dry_run: self.dry_run,
        }
    }

    /// Validator options derived from this configuration.
    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            update_existing: self.update_existing,
        }
    }

    /// Validate that the configuration is fit for a production run.
    ///
    /// Production runs need an API token and an HTTPS endpoint.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.api.api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("PLATFORM_API_TOKEN".to_string()));
        }
        if !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "PLATFORM_API_URL".to_string(),
                message: "must use https".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PLATFORM_MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for the platform API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Base URL for the service (e.g., "https://api.relay.io").
    pub base_url: String,

    /// Bearer token for the platform API.
    pub api_key: Option<String>,
}

impl ServiceEndpoint {
    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Check if token authentication is available.
    pub fn has_auth(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ReconcileConfig::default();
        assert_eq!(config.default_timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert!(config.verify_tls);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_from_lookup() {
        let config = ReconcileConfig::from_lookup(lookup(&[
            ("PLATFORM_API_URL", "https://api.relay.io"),
            ("PLATFORM_API_TOKEN", "secret"),
            ("PLATFORM_TIMEOUT_SECS", "5"),
            ("PLATFORM_MAX_RETRIES", "7"),
            ("PLATFORM_VERIFY_TLS", "0"),
            ("PLATFORM_DRY_RUN", "true"),
        ]));

        assert_eq!(config.api.base_url, "https://api.relay.io");
        assert!(config.api.has_auth());
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.client_policies().read.max_attempts, 7);
        assert!(!config.verify_tls);
        assert!(config.processor_options().dry_run);
        assert!(!config.validator_options().update_existing);
    }

    #[test]
    fn test_from_lookup_ignores_garbage() {
        let config = ReconcileConfig::from_lookup(lookup(&[
            ("PLATFORM_TIMEOUT_SECS", "soon"),
            ("PLATFORM_API_TOKEN", ""),
        ]));
        assert_eq!(config.default_timeout_secs, 30);
        assert!(!config.api.has_auth());
    }

    #[test]
    fn test_service_endpoint_url() {
        let endpoint = ServiceEndpoint {
            base_url: "https://api.relay.io/".to_string(),
            api_key: None,
        };

        assert_eq!(
            endpoint.url("/api/v1/projects"),
            "https://api.relay.io/api/v1/projects"
        );
        assert_eq!(
            endpoint.url("api/v1/projects"),
            "https://api.relay.io/api/v1/projects"
        );
    }

    #[test]
    fn test_validate_for_production() {
        let mut config = ReconcileConfig::default();
        assert!(config.validate_for_production().is_err());

        config.api.api_key = Some("token".to_string());
        assert!(matches!(
            config.validate_for_production(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.api.base_url = "https://api.relay.io".to_string();
        assert!(config.validate_for_production().is_ok());
    }
}
