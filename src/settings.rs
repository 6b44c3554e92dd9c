//! Client settings

use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of the event ingestion queue
pub const DEFAULT_INGEST_CAPACITY: usize = 100;

/// Default capacity of each subscriber's delivery queue
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 10;

/// Default number of log lines buffered between producer and reader
pub const DEFAULT_LOG_BUFFER: usize = 16;

/// Project name used when there is no working directory to derive one from
pub const FALLBACK_PROJECT_NAME: &str = "fakedc";

/// A compose version that is known not to trigger compatibility warnings
pub const DEFAULT_RUNTIME_VERSION: &str = "v1.29.2";

/// Build identifier reported by the fake runtime
pub const FAKE_RUNTIME_BUILD: &str = "composectl-fake";

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "COMPOSECTL_";

/// Tunables shared by the compose clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Capacity of the event ingestion queue
    pub ingest_capacity: usize,
    /// Capacity of each event subscriber's delivery queue
    pub subscriber_capacity: usize,
    /// Log lines buffered per stream
    pub log_buffer: usize,
    /// Project name used for directory-less contexts
    pub fallback_project_name: String,
    /// Version reported when none has been configured
    pub default_version: String,
    /// Build identifier reported alongside the version
    pub fake_build: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            log_buffer: DEFAULT_LOG_BUFFER,
            fallback_project_name: FALLBACK_PROJECT_NAME.to_string(),
            default_version: DEFAULT_RUNTIME_VERSION.to_string(),
            fake_build: FAKE_RUNTIME_BUILD.to_string(),
        }
    }
}

impl ClientSettings {
    /// Load settings from a YAML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: ClientSettings = serde_yaml::from_str(content)
            .map_err(|e| ComposeError::InvalidConfig(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `COMPOSECTL_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(std::env::vars())
    }

    /// Apply overrides from an arbitrary set of variables
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match field {
                "INGEST_CAPACITY" => self.ingest_capacity = parse_capacity(&key, &value)?,
                "SUBSCRIBER_CAPACITY" => self.subscriber_capacity = parse_capacity(&key, &value)?,
                "LOG_BUFFER" => self.log_buffer = parse_capacity(&key, &value)?,
                "FALLBACK_PROJECT_NAME" => self.fallback_project_name = value,
                "DEFAULT_VERSION" => self.default_version = value,
                "FAKE_BUILD" => self.fake_build = value,
                _ => tracing::debug!("Ignoring unknown setting {}", key),
            }
        }

        self.validate()?;
        Ok(self)
    }

    /// Check that every queue can hold at least one item
    pub fn validate(&self) -> Result<()> {
        if self.ingest_capacity == 0 || self.subscriber_capacity == 0 || self.log_buffer == 0 {
            return Err(ComposeError::InvalidConfig(
                "queue capacities must be greater than zero".to_string(),
            ));
        }
        if self.fallback_project_name.is_empty() {
            return Err(ComposeError::InvalidConfig(
                "fallback project name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_capacity(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        ComposeError::InvalidConfig(format!("{} must be a number, got '{}'", key, value))
    })
}
