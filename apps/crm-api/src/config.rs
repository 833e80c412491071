//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing required variable or a malformed value
//! stops startup with a message naming the variable.

use std::env;
use std::time::Duration;

use crm_webhooks::services::delivery_service::DEFAULT_USER_AGENT;
use crm_webhooks::services::dispatcher::DEFAULT_MAX_CONCURRENT_DELIVERIES;
use thiserror::Error;

/// Development-only WEBHOOK_ENCRYPTION_KEY: 64 hex '4' characters.
pub const INSECURE_WEBHOOK_KEY: &str =
    "4444444444444444444444444444444444444444444444444444444444444444";

const DEFAULT_PORT: &str = "8001";
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,

    /// HS256 key for verifying bearer tokens.
    pub jwt_secret: String,

    /// AES-256-GCM key for subscription secrets at rest.
    pub webhook_encryption_key: [u8; 32],

    /// True when `webhook_encryption_key` fell back to the development key.
    pub uses_insecure_webhook_key: bool,

    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub cors_origins: Vec<String>,

    pub webhook_user_agent: String,
    pub max_concurrent_deliveries: usize,
    pub drain_timeout: Duration,

    /// Permit loopback and private-network webhook targets.
    pub allow_private_hosts: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[redacted]")
            .field("jwt_secret", &"[redacted]")
            .field("webhook_encryption_key", &"[redacted]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("cors_origins", &self.cors_origins)
            .field("webhook_user_agent", &self.webhook_user_agent)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .field("drain_timeout", &self.drain_timeout)
            .field("allow_private_hosts", &self.allow_private_hosts)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment, after reading `.env`
    /// if one is present.
    ///
    /// # Required Variables
    ///
    /// - `DATABASE_URL` - PostgreSQL connection string
    /// - `JWT_SECRET` - HS256 token verification key
    ///
    /// # Optional Variables
    ///
    /// - `WEBHOOK_ENCRYPTION_KEY` - 64 hex chars (default: development key)
    /// - `HOST` / `PORT` - bind address (default: `0.0.0.0:8001`)
    /// - `RUST_LOG` - log filter (default: "info")
    /// - `CORS_ORIGINS` - comma-separated origins (default: "*")
    /// - `WEBHOOK_USER_AGENT`, `WEBHOOK_MAX_CONCURRENT_DELIVERIES`,
    ///   `WEBHOOK_DRAIN_TIMEOUT_SECS`, `WEBHOOK_ALLOW_PRIVATE_HOSTS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
        };

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let (webhook_encryption_key, uses_insecure_webhook_key) =
            match lookup("WEBHOOK_ENCRYPTION_KEY").filter(|v| !v.is_empty()) {
                Some(hex_key) => (
                    parse_hex_encryption_key("WEBHOOK_ENCRYPTION_KEY", &hex_key)?,
                    hex_key == INSECURE_WEBHOOK_KEY,
                ),
                None => (
                    parse_hex_encryption_key("WEBHOOK_ENCRYPTION_KEY", INSECURE_WEBHOOK_KEY)?,
                    true,
                ),
            };

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = lookup("PORT")
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
            .parse()?;

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        let webhook_user_agent =
            lookup("WEBHOOK_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let max_concurrent_deliveries = match lookup("WEBHOOK_MAX_CONCURRENT_DELIVERIES") {
            Some(v) => parse_positive("WEBHOOK_MAX_CONCURRENT_DELIVERIES", &v)?,
            None => DEFAULT_MAX_CONCURRENT_DELIVERIES,
        };

        let drain_timeout = match lookup("WEBHOOK_DRAIN_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().map_err(|_| ConfigError::InvalidValue {
                var: "WEBHOOK_DRAIN_TIMEOUT_SECS".to_string(),
                message: format!("Expected a number of seconds, got {v:?}"),
            })?),
            None => Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        };

        let allow_private_hosts = match lookup("WEBHOOK_ALLOW_PRIVATE_HOSTS") {
            Some(v) => parse_bool("WEBHOOK_ALLOW_PRIVATE_HOSTS", &v)?,
            None => false,
        };

        Ok(Self {
            database_url,
            jwt_secret,
            webhook_encryption_key,
            uses_insecure_webhook_key,
            host,
            port,
            rust_log,
            cors_origins,
            webhook_user_agent,
            max_concurrent_deliveries,
            drain_timeout,
            allow_private_hosts,
        })
    }

    /// Get the server bind address as a socket address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_hex_encryption_key(var_name: &str, hex_str: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(hex_str).map_err(|_| ConfigError::InvalidValue {
        var: var_name.to_string(),
        message: "Must be 64 hex characters (32 bytes)".to_string(),
    })?;

    if bytes.len() != 32 {
        return Err(ConfigError::InvalidValue {
            var: var_name.to_string(),
            message: format!("Expected 32 bytes, got {}", bytes.len()),
        });
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

fn parse_positive(var_name: &str, value: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            var: var_name.to_string(),
            message: format!("Expected a positive integer, got {value:?}"),
        }),
    }
}

fn parse_bool(var_name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var: var_name.to_string(),
            message: format!("Expected true or false, got {value:?}"),
        }),
    }
}
