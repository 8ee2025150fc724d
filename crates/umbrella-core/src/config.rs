//! Configuration types for the Umbrella provider
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::value::{AttrValue, Object};

/// Environment variable consulted when `host` is not configured
pub const ENV_HOST: &str = "UMBRELLA_HOST";
/// Environment variable consulted when `apikey` is not configured
pub const ENV_API_KEY: &str = "UMBRELLA_APIKEY";
/// Environment variable consulted when `apisecret` is not configured
pub const ENV_API_SECRET: &str = "UMBRELLA_APISECRET";

/// Main provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Remote API credentials
    #[serde(default)]
    pub api: ApiSettings,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional reconciler settings
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

impl ProviderConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;
        self.state_store.validate()?;
        self.reconciler.validate()?;
        Ok(())
    }
}

/// Remote API settings
///
/// Built from the provider's configuration attributes, where any of the three
/// values may be left unset and supplied through the environment instead.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// API host, e.g. `api.umbrella.com`
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub api_secret: String,
}

impl ApiSettings {
    /// Resolve settings from provider attributes, falling back to the process environment
    pub fn from_attributes(attributes: &Object) -> Result<Self> {
        Self::from_attributes_with(attributes, |name| std::env::var(name).ok())
    }

    /// Resolve settings with an explicit environment lookup
    ///
    /// For each of `host`, `apikey` and `apisecret`:
    /// - Unknown is rejected (the value cannot be known at configure time)
    /// - Null falls back to the environment variable
    /// - An empty result is rejected
    pub fn from_attributes_with<F>(attributes: &Object, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let settings = Self {
            host: resolve_setting(attributes, "host", ENV_HOST, &env)?,
            api_key: resolve_setting(attributes, "apikey", ENV_API_KEY, &env)?,
            api_secret: resolve_setting(attributes, "apisecret", ENV_API_SECRET, &env)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the API settings
    pub fn validate(&self) -> Result<()> {
        for (name, env, value) in [
            ("host", ENV_HOST, &self.host),
            ("apikey", ENV_API_KEY, &self.api_key),
            ("apisecret", ENV_API_SECRET, &self.api_secret),
        ] {
            if value.is_empty() {
                return Err(Error::config(format!(
                    "Missing Umbrella API {}: set the '{}' attribute or the {} environment variable",
                    name, name, env
                )));
            }
        }
        Ok(())
    }
}

fn resolve_setting<F>(attributes: &Object, name: &str, env_var: &str, env: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match attributes.value(name) {
        AttrValue::Unknown => Err(Error::config(format!(
            "Unknown Umbrella API {}: the value must be known when the provider is configured \
             (set it statically or use the {} environment variable)",
            name, env_var
        ))),
        AttrValue::Null => Ok(env(env_var).unwrap_or_default()),
        value => Ok(value.as_str()?.to_string()),
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("host", &self.host)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(Error::config("State file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory => "memory",
        }
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Capacity of the reconcile event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Age after which a record is reported as stale (in seconds)
    ///
    /// Informational only; nothing is refreshed automatically.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl ReconcilerConfig {
    /// Validate the reconciler configuration
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Staleness threshold as a chrono duration
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_stale_after_secs() -> u64 {
    24 * 60 * 60
}
