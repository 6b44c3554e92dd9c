//! Compose file schema types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single compose file, as written on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Legacy file format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Top-level project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Services
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    /// Networks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
    /// Volumes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Option<VolumeConfig>>,
}

/// Service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandConfig>,
    /// Entrypoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandConfig>,
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Port mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortConfig>>,
    /// Volume mounts, in short or long syntax
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<serde_yaml::Value>>,
    /// Networks to connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<NetworksConfig>,
    /// Service dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    /// Labels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<EnvironmentConfig>,
    /// Profiles this service belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<String>>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Keys this client does not interpret, kept as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ServiceConfig {
    /// Names of the services this one depends on
    pub fn dependencies(&self) -> Vec<String> {
        match &self.depends_on {
            Some(DependsOnConfig::Array(arr)) => arr.clone(),
            Some(DependsOnConfig::Map(map)) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Whether the service is enabled for the given set of profiles.
    /// Services without profiles are always enabled.
    pub fn is_enabled(&self, active_profiles: &[String]) -> bool {
        match &self.profiles {
            None => true,
            Some(profiles) if profiles.is_empty() => true,
            Some(profiles) => profiles.iter().any(|p| active_profiles.contains(p)),
        }
    }

    /// Whether the service needs its image built
    pub fn needs_build(&self) -> bool {
        self.build.is_some()
    }

    /// Merge `overlay` into this service. Fields set in the overlay win.
    pub fn merge(&mut self, overlay: ServiceConfig) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(
                    if overlay.$field.is_some() {
                        self.$field = overlay.$field;
                    }
                )*
            };
        }

        take!(
            image,
            build,
            command,
            entrypoint,
            container_name,
            environment,
            ports,
            volumes,
            networks,
            depends_on,
            labels,
            profiles,
            restart,
            working_dir,
            user
        );
        self.extra.extend(overlay.extra);
    }
}

/// Build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildConfig {
    /// Simple context path
    Simple(String),
    /// Full build configuration
    Full(BuildConfigFull),
}

/// Full build configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfigFull {
    /// Build context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Dockerfile path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<EnvironmentConfig>,
    /// Target stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Command configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// Environment or label configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
}

impl EnvironmentConfig {
    /// Flatten into a key/value map. Keys without a value map to `None`.
    pub fn to_map(&self) -> BTreeMap<String, Option<String>> {
        match self {
            EnvironmentConfig::Array(arr) => arr
                .iter()
                .map(|item| match item.split_once('=') {
                    Some((key, value)) => (key.to_string(), Some(value.to_string())),
                    None => (item.clone(), None),
                })
                .collect(),
            EnvironmentConfig::Map(map) => map
                .iter()
                .map(|(key, value)| (key.clone(), value.as_ref().map(scalar_to_string)))
                .collect(),
        }
    }
}

/// Render a YAML scalar the way it would appear in an environment variable
fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Bare container port
    Number(u16),
    /// Short syntax: "8080:80"
    Short(String),
    /// Long syntax
    Long(PortConfigLong),
}

/// Long port configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfigLong {
    /// Target port in container
    pub target: u16,
    /// Published port on host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<serde_yaml::Value>,
    /// Host IP to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Protocol (tcp/udp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Networks configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworksConfig {
    /// Array of network names
    Array(Vec<String>),
    /// Map of network name to per-service settings
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
}

impl NetworksConfig {
    pub fn names(&self) -> Vec<String> {
        match self {
            NetworksConfig::Array(arr) => arr.clone(),
            NetworksConfig::Map(map) => map.keys().cloned().collect(),
        }
    }
}

/// Depends on configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition
    Map(BTreeMap<String, DependsOnCondition>),
}

/// Depends on condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for
    #[serde(default = "default_condition")]
    pub condition: String,
}

fn default_condition() -> String {
    "service_started".to_string()
}

/// Top-level network definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Whether the network is managed outside the project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    /// Explicit network name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Keys this client does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Top-level volume definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Whether the volume is managed outside the project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<bool>,
    /// Explicit volume name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Keys this client does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depends_on_forms() {
        let yaml = r#"
services:
  web:
    image: nginx
    depends_on:
      - api
  api:
    image: node
    depends_on:
      db:
        condition: service_healthy
  db:
    image: postgres
"#;
        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.services["web"].dependencies(), vec!["api".to_string()]);
        assert_eq!(file.services["api"].dependencies(), vec!["db".to_string()]);
        assert!(file.services["db"].dependencies().is_empty());
    }

    #[test]
    fn test_environment_forms() {
        let array = EnvironmentConfig::Array(vec!["A=1".to_string(), "B".to_string()]);
        let map = array.to_map();
        assert_eq!(map["A"].as_deref(), Some("1"));
        assert_eq!(map["B"], None);

        let yaml = "PORT: 8080\nDEBUG: true\nEMPTY:\n";
        let env: EnvironmentConfig = serde_yaml::from_str(yaml).unwrap();
        let map = env.to_map();
        assert_eq!(map["PORT"].as_deref(), Some("8080"));
        assert_eq!(map["DEBUG"].as_deref(), Some("true"));
        assert_eq!(map["EMPTY"], None);
    }

    #[test]
    fn test_profiles_enable_service() {
        let service = ServiceConfig {
            profiles: Some(vec!["debug".to_string()]),
            ..Default::default()
        };
        assert!(!service.is_enabled(&[]));
        assert!(service.is_enabled(&["debug".to_string()]));
        assert!(ServiceConfig::default().is_enabled(&[]));
    }

    #[test]
    fn test_merge_overlay_wins() {
        let mut base = ServiceConfig {
            image: Some("nginx:1".to_string()),
            restart: Some("always".to_string()),
            ..Default::default()
        };
        base.merge(ServiceConfig {
            image: Some("nginx:2".to_string()),
            ..Default::default()
        });

        assert_eq!(base.image.as_deref(), Some("nginx:2"));
        assert_eq!(base.restart.as_deref(), Some("always"));
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let yaml = "image: redis\nstop_signal: SIGINT\n";
        let service: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(service.extra.contains_key("stop_signal"));
    }
}
