//! API configuration module.
//!
//! Configuration is loaded from environment variables with fallback to defaults.

use serde::{Deserialize, Serialize};
use std::env;

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP listen port
    pub http_port: u16,

    /// Path to the SQLite database file
    pub database_path: String,

    /// Maximum pooled connections
    pub db_max_connections: u32,

    /// JWT secret key for verifying bearer tokens
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    pub jwt_lifetime_secs: i64,

    /// Payment provider base URL. Online checkout is refused when unset.
    pub payment_gateway_url: Option<String>,

    /// Webhook that receives notification emails. Logged only when unset.
    pub notify_webhook_url: Option<String>,

    /// Days between two reminders of the same prescription plan
    pub plan_reminder_interval_days: i64,

    /// Seconds between two runs of the reminder job
    pub reminder_job_interval_secs: u64,

    /// Expose `POST /api/Auth/dev-token`
    pub enable_dev_tokens: bool,
}

fn parsed<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = ApiConfig {
            http_port: parsed("HTTP_PORT", "8080")?,

            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./quickpharma.db".to_string()),

            db_max_connections: parsed("DB_MAX_CONNECTIONS", "5")?,

            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                // Development only; production deployments set JWT_SECRET
                "quickpharma-dev-secret-change-in-production".to_string()
            }),

            jwt_lifetime_secs: parsed("JWT_LIFETIME_SECS", "3600")?, // 1 hour

            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL").ok().filter(|s| !s.is_empty()),

            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),

            plan_reminder_interval_days: parsed("PLAN_REMINDER_INTERVAL_DAYS", "30")?,

            reminder_job_interval_secs: parsed("REMINDER_JOB_INTERVAL_SECS", "3600")?,

            enable_dev_tokens: env::var("ENABLE_DEV_TOKENS")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        };

        if config.plan_reminder_interval_days <= 0 {
            return Err(ConfigError::InvalidValue("PLAN_REMINDER_INTERVAL_DAYS".to_string()));
        }
        if config.reminder_job_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("REMINDER_JOB_INTERVAL_SECS".to_string()));
        }

        Ok(config)
    }

    /// Defaults suitable for tests: dev tokens on, no external services.
    pub fn for_tests() -> Self {
        ApiConfig {
            http_port: 0,
            database_path: ":memory:".to_string(),
            db_max_connections: 1,
            jwt_secret: "test-secret".to_string(),
            jwt_lifetime_secs: 3600,
            payment_gateway_url: None,
            notify_webhook_url: None,
            plan_reminder_interval_days: 30,
            reminder_job_interval_secs: 3600,
            enable_dev_tokens: true,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_default_and_invalid() {
        let port: u16 = parsed("QP_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);

        let err = parsed::<u16>("QP_TEST_UNSET_PORT", "not-a-port").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "QP_TEST_UNSET_PORT"));
    }
}
