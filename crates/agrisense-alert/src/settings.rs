//! Environment-driven settings for the registry client and the alert
//! dispatcher.
//!
//! Every reader takes a lookup closure so tests can supply values without
//! touching the process environment. Empty values count as unset.

use std::str::FromStr;
use std::time::Duration;

use crate::error::SettingsError;

/// Alert webhook configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    /// Delivery endpoint. Delivery is skipped when unset.
    pub webhook_url: Option<String>,
    /// Sent as `X-Service-Token` when set.
    pub service_token: Option<String>,
    /// Total attempts per payload, at least 1.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each failure.
    pub retry_base: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            service_token: None,
            max_attempts: 3,
            retry_base: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

impl AlertSettings {
    pub const WEBHOOK_URL: &'static str = "ALERT_WEBHOOK_URL";
    pub const SERVICE_TOKEN: &'static str = "ALERT_SERVICE_TOKEN";
    pub const MAX_RETRIES: &'static str = "ALERT_MAX_RETRIES";
    pub const RETRY_BASE_SECONDS: &'static str = "ALERT_RETRY_BASE_SECONDS";
    pub const TIMEOUT_SECONDS: &'static str = "ALERT_TIMEOUT_SECONDS";

    /// Read settings through `lookup`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] if a numeric variable does not
    /// parse or a duration is negative or not finite.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_attempts: u32 =
            parse_or(&lookup, Self::MAX_RETRIES, defaults.max_attempts)?.max(1);
        Ok(Self {
            webhook_url: non_empty(&lookup, Self::WEBHOOK_URL),
            service_token: non_empty(&lookup, Self::SERVICE_TOKEN),
            max_attempts,
            retry_base: seconds_or(&lookup, Self::RETRY_BASE_SECONDS, defaults.retry_base)?,
            timeout: seconds_or(&lookup, Self::TIMEOUT_SECONDS, defaults.timeout)?,
        })
    }

    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Farm registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Registry base URL. Lookups are skipped when unset.
    pub base_url: Option<String>,
    /// Path prefix under which farms are addressed by id.
    pub farms_path: String,
    /// Bound on a single lookup.
    pub timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            base_url: None,
            farms_path: "/api/farms".into(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RegistrySettings {
    pub const URL: &'static str = "REGISTRY_URL";
    pub const FARMS_PATH: &'static str = "REGISTRY_FARMS_PATH";
    pub const TIMEOUT_SECONDS: &'static str = "REGISTRY_TIMEOUT_SECONDS";

    /// Read settings through `lookup`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] if the timeout does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            base_url: non_empty(&lookup, Self::URL),
            farms_path: non_empty(&lookup, Self::FARMS_PATH).unwrap_or(defaults.farms_path),
            timeout: seconds_or(&lookup, Self::TIMEOUT_SECONDS, defaults.timeout)?,
        })
    }

    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// The trimmed value of `key`, or `None` when unset or blank.
pub fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parse `key` as `T`, or return `default` when unset.
///
/// # Errors
///
/// Returns [`SettingsError::Invalid`] if the value does not parse.
pub fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| SettingsError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Parse `key` as a (possibly fractional) number of seconds.
///
/// # Errors
///
/// Returns [`SettingsError::Invalid`] if the value does not parse or is
/// negative or not finite.
pub fn seconds_or<F>(
    lookup: &F,
    key: &'static str,
    default: Duration,
) -> Result<Duration, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = non_empty(lookup, key) else {
        return Ok(default);
    };
    let invalid = |reason: String| SettingsError::Invalid {
        key,
        value: value.clone(),
        reason,
    };
    let secs: f64 = value.parse().map_err(|e: std::num::ParseFloatError| invalid(e.to_string()))?;
    Duration::try_from_secs_f64(secs).map_err(|e| invalid(e.to_string()))
}
