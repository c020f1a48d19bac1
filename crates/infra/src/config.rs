//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Secrets fall back to
//! insecure development defaults with a warning, like the API's JWT secret
//! used to.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use simbridge_catalog::CountryToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Provider API connection settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Attempts for idempotent reads (catalog fetch, activation lookup).
    pub max_retries: u32,
}

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` runs on in-memory stores.
    pub database_url: Option<String>,
    pub provider: ProviderSettings,
    pub sync_concurrency: usize,
    pub default_markup_bps: u32,
    pub fulfillment_lease: Duration,
    pub audit_implausible_gb: u64,
    pub country_token: CountryToken,
    pub webhook_secret: String,
    pub admin_token: String,
    pub bind_addr: SocketAddr,
}

impl Settings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = get("PROVIDER_API_URL").ok_or(ConfigError::Missing("PROVIDER_API_URL"))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "PROVIDER_API_URL",
                value: base_url,
                reason: "expected an http(s) URL".to_string(),
            });
        }
        let api_key = get("PROVIDER_API_KEY").ok_or(ConfigError::Missing("PROVIDER_API_KEY"))?;

        let country_token = match get("COUNTRY_TOKEN").as_deref() {
            None | Some("iso") => CountryToken::IsoCode,
            Some("name") => CountryToken::Name,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "COUNTRY_TOKEN",
                    value: other.to_string(),
                    reason: "expected `iso` or `name`".to_string(),
                });
            }
        };

        let sync_concurrency: usize = parse_or(&get, "SYNC_CONCURRENCY", 8)?;
        if sync_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let lease_secs: u64 = parse_or(&get, "FULFILLMENT_LEASE_SECS", 120)?;
        if lease_secs == 0 || lease_secs > MAX_LEASE_SECS {
            return Err(ConfigError::Invalid {
                key: "FULFILLMENT_LEASE_SECS",
                value: lease_secs.to_string(),
                reason: format!("must be between 1 and {MAX_LEASE_SECS}"),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            provider: ProviderSettings {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
                timeout: Duration::from_secs(parse_or(&get, "PROVIDER_TIMEOUT_SECS", 30)?),
                max_retries: parse_or(&get, "PROVIDER_MAX_RETRIES", 3)?,
            },
            sync_concurrency,
            default_markup_bps: parse_or(&get, "DEFAULT_MARKUP_BPS", 2500)?,
            fulfillment_lease: Duration::from_secs(lease_secs),
            audit_implausible_gb: parse_or(&get, "AUDIT_IMPLAUSIBLE_GB", 100)?,
            country_token,
            webhook_secret: secret_or_dev_default(get("WEBHOOK_SECRET"), "WEBHOOK_SECRET"),
            admin_token: secret_or_dev_default(get("ADMIN_TOKEN"), "ADMIN_TOKEN"),
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
        })
    }
}

/// Upper bound on a fulfillment lease: one day.
const MAX_LEASE_SECS: u64 = 86_400;

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn secret_or_dev_default(value: Option<String>, key: &'static str) -> String {
    value.unwrap_or_else(|| {
        tracing::warn!(setting = key, "secret not set; using insecure dev default");
        "dev-secret".to_string()
    })
}
