//! Value types passed across the compose client interface

use crate::error::{ComposeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A request to bring a single compose service up
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceUpSpec {
    service: String,
    build: bool,
}

impl ServiceUpSpec {
    /// Create a spec for `service`. The name must not be empty.
    pub fn new(service: &str, build: bool) -> Result<Self> {
        if service.trim().is_empty() {
            return Err(ComposeError::InvalidConfig(
                "service name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            service: service.to_string(),
            build,
        })
    }

    /// Service name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether the service's image must be built before starting
    pub fn build(&self) -> bool {
        self.build
    }
}

impl fmt::Display for ServiceUpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service)
    }
}

/// Identifies a compose project on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeProject {
    /// Explicit project name; derived from `project_path` when unset
    #[serde(default)]
    pub name: Option<String>,
    /// Working directory of the project
    #[serde(default)]
    pub project_path: PathBuf,
    /// Compose files, merged in order
    #[serde(default)]
    pub config_paths: Vec<PathBuf>,
    /// Inline compose text, used instead of `config_paths` when set
    #[serde(default)]
    pub yaml: Option<String>,
    /// Extra `.env` style file layered over the base environment
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    /// Enabled profiles
    #[serde(default)]
    pub profiles: Vec<String>,
}

impl ComposeProject {
    /// Create a project rooted at `project_path`
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            ..Default::default()
        }
    }

    /// Set an explicit project name
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Add a compose file
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_paths.push(path.into());
        self
    }

    /// Use inline compose text
    pub fn yaml(mut self, yaml: &str) -> Self {
        self.yaml = Some(yaml.to_string());
        self
    }

    /// Layer an env file over the base environment
    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Enable a profile
    pub fn profile(mut self, profile: &str) -> Self {
        self.profiles.push(profile.to_string());
        self
    }
}

/// A single call to `up`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpCall {
    pub spec: ServiceUpSpec,
    pub should_build: bool,
}

/// A single call to `down`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownCall {
    pub project: ComposeProject,
}

/// A single call to `rm`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmCall {
    pub specs: Vec<ServiceUpSpec>,
}

/// Identifier of a running container
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random short ID in the runtime's 12 hex digit format
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string()[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container state, as implied by runtime events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container is paused
    Paused,
    /// Container was stopped
    Stopped,
    /// Container has exited
    Exited,
    /// Container is being removed
    Removing,
    /// Container is in an error state
    Dead,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Stopped => write!(f, "stopped"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Removing => write!(f, "removing"),
            ContainerStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Version reported by the compose runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeVersion {
    /// Version string, e.g. `v2.20.2` or `1.29.2`
    pub version: String,
    /// Build or variant identifier
    pub build: String,
}

impl RuntimeVersion {
    pub fn new(version: &str, build: &str) -> Self {
        Self {
            version: version.to_string(),
            build: build.to_string(),
        }
    }

    /// Major version number, if the version string starts with one
    pub fn major(&self) -> Option<u32> {
        self.version
            .trim_start_matches('v')
            .split('.')
            .next()
            .and_then(|major| major.parse().ok())
    }

    /// Whether this is a v2 (or later) runtime. Unparseable versions are
    /// treated as modern.
    pub fn is_v2(&self) -> bool {
        self.major().map_or(true, |major| major >= 2)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (build {})", self.version, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_service_rejected() {
        assert!(ServiceUpSpec::new("", false).is_err());
        assert!(ServiceUpSpec::new("  ", true).is_err());

        let spec = ServiceUpSpec::new("web", true).unwrap();
        assert_eq!(spec.service(), "web");
        assert!(spec.build());
    }

    #[test]
    fn test_project_builder() {
        let project = ComposeProject::new("/src/app")
            .name("app")
            .config_path("/src/app/compose.yaml")
            .profile("debug");

        assert_eq!(project.name.as_deref(), Some("app"));
        assert_eq!(project.config_paths.len(), 1);
        assert_eq!(project.profiles, vec!["debug".to_string()]);
    }

    #[test]
    fn test_generated_container_id() {
        let id = ContainerId::generate();
        assert_eq!(id.as_str().len(), 12);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_runtime_version_major() {
        assert_eq!(RuntimeVersion::new("v1.29.2", "fake").major(), Some(1));
        assert!(!RuntimeVersion::new("1.29.2", "fake").is_v2());
        assert!(RuntimeVersion::new("v2.20.2", "desktop").is_v2());
        assert!(RuntimeVersion::new("dev", "local").is_v2());
    }
}
