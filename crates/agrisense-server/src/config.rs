//! Process configuration, read once at startup.

use std::net::SocketAddr;

use agrisense_alert::settings::{non_empty, parse_or};
use agrisense_alert::{AlertSettings, RegistrySettings, SettingsError};
use agrisense_ndvi::IndexEngineKind;

/// Default listen address, `0.0.0.0:8000`.
pub const DEFAULT_BIND: ([u8; 4], u16) = ([0, 0, 0, 0], 8000);

/// Everything the service reads from its environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: SocketAddr,
    pub engine: IndexEngineKind,
    pub alert: AlertSettings,
    pub registry: RegistrySettings,
}

impl Settings {
    pub const BIND: &'static str = "AGRISENSE_BIND";
    pub const ENGINE: &'static str = "NDVI_ENGINE";

    /// Read settings through `lookup`.
    ///
    /// The index engine defaults to [`IndexEngineKind::detect`].
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for an unparsable address,
    /// engine name, or numeric alert/registry setting.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let engine = match non_empty(&lookup, Self::ENGINE) {
            None => IndexEngineKind::detect(),
            Some(value) => value
                .parse()
                .map_err(|reason| SettingsError::Invalid {
                    key: Self::ENGINE,
                    value,
                    reason,
                })?,
        };
        Ok(Self {
            bind: parse_or(&lookup, Self::BIND, SocketAddr::from(DEFAULT_BIND))?,
            engine,
            alert: AlertSettings::from_lookup(&lookup)?,
            registry: RegistrySettings::from_lookup(&lookup)?,
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
