//! Compose project loading
//!
//! Turns raw compose file text, a working directory and an environment into
//! a [`LoadedProject`]. The loader is a seam: clients hold a
//! [`ProjectLoader`] and the default [`YamlProjectLoader`] covers the parts
//! of the compose format this crate understands:
//!
//! - variable interpolation (`$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR:?error}`)
//! - merging several files in order
//! - profiles
//! - project name derivation from the working directory

use super::config::{ComposeFile, NetworkConfig, ServiceConfig, VolumeConfig};
use super::model::ServiceUpSpec;
use crate::error::{ComposeError, Result};
use crate::settings::FALLBACK_PROJECT_NAME;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default compose file names, in lookup order
pub const DEFAULT_COMPOSE_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Environment variable that overrides the project name
pub const PROJECT_NAME_ENV: &str = "COMPOSE_PROJECT_NAME";

/// Variables available for interpolation
pub type Environment = BTreeMap<String, String>;

/// Normalize a project name: lowercase, keep only `[a-z0-9_-]`, then strip
/// any leading `_` or `-`. Applying it twice gives the same result.
pub fn normalize_project_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
        .collect::<String>()
        .trim_start_matches(['_', '-'])
        .to_string()
}

/// Derive a project name from the final component of `working_dir`.
///
/// An empty working directory, or one whose name normalizes to nothing,
/// yields `fallback`.
pub fn derive_project_name(working_dir: &Path, fallback: &str) -> String {
    if working_dir.as_os_str().is_empty() {
        return fallback.to_string();
    }

    let name = working_dir
        .file_name()
        .map(|s| normalize_project_name(&s.to_string_lossy()))
        .unwrap_or_default();

    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

/// Find the first default compose file in `dir`
pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
    DEFAULT_COMPOSE_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

/// Read compose files, in order
pub fn read_config_files(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| {
            std::fs::read_to_string(path).map_err(|e| {
                ComposeError::ConfigParse(format!("Failed to read {}: {}", path.display(), e))
            })
        })
        .collect()
}

/// The process environment
pub fn process_environment() -> Environment {
    std::env::vars().collect()
}

/// Parse `.env` style content: `KEY=VALUE` lines, `#` comments, an optional
/// `export ` prefix and optional matching quotes around the value.
pub fn parse_env_file(content: &str) -> Result<Environment> {
    let mut env = Environment::new();

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=').ok_or_else(|| {
            ComposeError::ConfigParse(format!(
                "env file line {}: expected KEY=VALUE, got '{}'",
                number + 1,
                line
            ))
        })?;

        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ComposeError::ConfigParse(format!(
                "env file line {}: invalid variable name '{}'",
                number + 1,
                key
            )));
        }

        env.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    Ok(env)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Read an env file and layer it over `base`
pub fn load_env_file(path: &Path, base: Environment) -> Result<Environment> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ComposeError::ConfigParse(format!("Failed to read env file {}: {}", path.display(), e))
    })?;

    let mut env = base;
    env.extend(parse_env_file(&content)?);
    Ok(env)
}

fn interpolation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?[-?])([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))")
            .unwrap()
    })
}

/// Substitute environment variables in `s`
pub fn interpolate(s: &str, env: &Environment) -> Result<String> {
    let mut error = None;

    let result = interpolation_pattern().replace_all(s, |caps: &Captures| {
        if caps.get(1).is_some() {
            return "$".to_string();
        }

        if let Some(name) = caps.get(5) {
            return lookup(env, name.as_str());
        }

        let name = &caps[2];
        let value = env.get(name);
        match caps.get(3).map(|m| m.as_str()) {
            None => lookup(env, name),
            Some(":-") => match value {
                Some(v) if !v.is_empty() => v.clone(),
                _ => caps[4].to_string(),
            },
            Some("-") => value.cloned().unwrap_or_else(|| caps[4].to_string()),
            Some(op) => {
                let missing = match op {
                    ":?" => value.map_or(true, |v| v.is_empty()),
                    _ => value.is_none(),
                };
                if missing {
                    if error.is_none() {
                        error = Some(ComposeError::ConfigParse(format!(
                            "required variable {} is missing a value: {}",
                            name, &caps[4]
                        )));
                    }
                    String::new()
                } else {
                    value.cloned().unwrap_or_default()
                }
            }
        }
    });

    match error {
        Some(err) => Err(err),
        None => Ok(result.into_owned()),
    }
}

fn lookup(env: &Environment, name: &str) -> String {
    env.get(name).cloned().unwrap_or_else(|| {
        tracing::warn!("The {} variable is not set. Defaulting to a blank string.", name);
        String::new()
    })
}

/// Interpolate every string scalar in a YAML tree. Mapping keys are left alone.
fn interpolate_value(value: &mut serde_yaml::Value, env: &Environment) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => *s = interpolate(s, env)?,
        serde_yaml::Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        serde_yaml::Value::Tagged(tagged) => interpolate_value(&mut tagged.value, env)?,
        _ => {}
    }
    Ok(())
}

/// Inputs to a project load
#[derive(Debug, Clone, Default)]
pub struct ConfigDetails {
    /// Raw compose file contents, merged in order
    pub config_texts: Vec<String>,
    /// Project working directory
    pub working_dir: PathBuf,
    /// Variables for interpolation
    pub environment: Environment,
    /// Explicit project name
    pub project_name: Option<String>,
    /// Enabled profiles
    pub profiles: Vec<String>,
}

impl ConfigDetails {
    pub fn new(
        config_text: &str,
        working_dir: impl Into<PathBuf>,
        environment: Environment,
    ) -> Self {
        Self {
            config_texts: vec![config_text.to_string()],
            working_dir: working_dir.into(),
            environment,
            ..Default::default()
        }
    }

    /// Merge another compose file over the previous ones
    pub fn config_text(mut self, text: &str) -> Self {
        self.config_texts.push(text.to_string());
        self
    }

    pub fn project_name(mut self, name: Option<&str>) -> Self {
        self.project_name = name.map(str::to_string);
        self
    }

    pub fn profiles(mut self, profiles: &[String]) -> Self {
        self.profiles = profiles.to_vec();
        self
    }
}

/// A fully resolved compose project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedProject {
    /// Resolved project name
    pub name: String,
    /// Project working directory
    pub working_dir: PathBuf,
    /// Enabled services
    pub services: BTreeMap<String, ServiceConfig>,
    /// Services excluded by profiles
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_services: Vec<String>,
    /// Networks
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
    /// Volumes
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Option<VolumeConfig>>,
}

impl LoadedProject {
    /// Names of the enabled services
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Up specs for every enabled service, in dependency order
    pub fn up_specs(&self) -> Result<Vec<ServiceUpSpec>> {
        self.start_order()?
            .iter()
            .map(|name| ServiceUpSpec::new(name, self.services[name].needs_build()))
            .collect()
    }

    /// Service start order based on dependencies
    pub fn start_order(&self) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        for service_name in self.services.keys() {
            self.topological_sort(service_name, &mut visited, &mut visiting, &mut order)?;
        }

        Ok(order)
    }

    fn topological_sort(
        &self,
        service: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(service) {
            return Ok(());
        }

        if !visiting.insert(service.to_string()) {
            return Err(ComposeError::ConfigParse(format!(
                "Circular dependency detected for service: {}",
                service
            )));
        }

        if let Some(config) = self.services.get(service) {
            for dep in config.dependencies() {
                self.topological_sort(&dep, visited, visiting, order)?;
            }
        }

        visiting.remove(service);
        visited.insert(service.to_string());
        order.push(service.to_string());

        Ok(())
    }
}

/// Loads compose text into a structured project
pub trait ProjectLoader: Send + Sync {
    fn load(&self, details: &ConfigDetails) -> Result<LoadedProject>;
}

/// Compose loader backed by `serde_yaml`
#[derive(Debug, Clone)]
pub struct YamlProjectLoader {
    fallback_name: String,
}

impl Default for YamlProjectLoader {
    fn default() -> Self {
        Self::new(FALLBACK_PROJECT_NAME)
    }
}

impl YamlProjectLoader {
    pub fn new(fallback_name: &str) -> Self {
        Self {
            fallback_name: fallback_name.to_string(),
        }
    }

    /// Parse and interpolate a single compose file
    pub fn parse_str(content: &str, env: &Environment) -> Result<ComposeFile> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ComposeError::ConfigParse(format!("Failed to parse YAML: {}", e)))?;

        if !value.is_mapping() {
            return Err(ComposeError::ConfigParse(
                "compose file must be a mapping at the top level".to_string(),
            ));
        }

        interpolate_value(&mut value, env)?;

        serde_yaml::from_value(value)
            .map_err(|e| ComposeError::ConfigParse(format!("Invalid compose file: {}", e)))
    }

    /// Merge two compose files. The overlay wins field by field.
    pub fn merge(base: ComposeFile, overlay: ComposeFile) -> ComposeFile {
        let mut result = base;

        if overlay.version.is_some() {
            result.version = overlay.version;
        }
        if overlay.name.is_some() {
            result.name = overlay.name;
        }

        for (name, service) in overlay.services {
            match result.services.get_mut(&name) {
                Some(existing) => existing.merge(service),
                None => {
                    result.services.insert(name, service);
                }
            }
        }

        result.networks.extend(overlay.networks);
        result.volumes.extend(overlay.volumes);

        result
    }

    /// Check the merged, profile-filtered project for dangling references
    pub fn validate(project: &LoadedProject) -> Result<()> {
        for (name, service) in &project.services {
            if service.image.is_none() && service.build.is_none() {
                return Err(ComposeError::ConfigParse(format!(
                    "Service '{}' must have either 'image' or 'build' specified",
                    name
                )));
            }

            for dep in service.dependencies() {
                if !project.services.contains_key(&dep) {
                    return Err(ComposeError::ConfigParse(format!(
                        "Service '{}' depends on undefined service '{}'",
                        name, dep
                    )));
                }
            }

            if let Some(networks) = &service.networks {
                for net in networks.names() {
                    if net != "default" && !project.networks.contains_key(&net) {
                        tracing::warn!(
                            "Service '{}' references undefined network '{}'",
                            name,
                            net
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn resolve_name(&self, details: &ConfigDetails, file: &ComposeFile) -> Result<String> {
        let non_empty = |name: &Option<String>| name.clone().filter(|name| !name.is_empty());
        let explicit = non_empty(&details.project_name)
            .or_else(|| non_empty(&details.environment.get(PROJECT_NAME_ENV).cloned()))
            .or_else(|| non_empty(&file.name));

        match explicit {
            Some(name) => {
                let normalized = normalize_project_name(&name);
                if normalized.is_empty() {
                    return Err(ComposeError::InvalidConfig(format!(
                        "project name '{}' contains no valid characters",
                        name
                    )));
                }
                Ok(normalized)
            }
            None => Ok(derive_project_name(&details.working_dir, &self.fallback_name)),
        }
    }
}

impl ProjectLoader for YamlProjectLoader {
    fn load(&self, details: &ConfigDetails) -> Result<LoadedProject> {
        if details.config_texts.iter().all(|text| text.trim().is_empty()) {
            return Err(ComposeError::ConfigParse("empty compose file".to_string()));
        }

        let mut merged = ComposeFile::default();
        for text in details.config_texts.iter().filter(|t| !t.trim().is_empty()) {
            let file = Self::parse_str(text, &details.environment)?;
            merged = Self::merge(merged, file);
        }

        let name = self.resolve_name(details, &merged)?;

        let mut services = BTreeMap::new();
        let mut disabled_services = Vec::new();
        for (service_name, service) in merged.services {
            if service.is_enabled(&details.profiles) {
                services.insert(service_name, service);
            } else {
                disabled_services.push(service_name);
            }
        }

        let project = LoadedProject {
            name,
            working_dir: details.working_dir.clone(),
            services,
            disabled_services,
            networks: merged.networks,
            volumes: merged.volumes,
        };

        Self::validate(&project)?;

        tracing::debug!(
            "Loaded compose project {} with {} services",
            project.name,
            project.services.len()
        );

        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_derive_name_from_basename() {
        let name = derive_project_name(Path::new("/home/dev/My-App_2"), "default");
        assert_eq!(name, "my-app_2");
    }

    #[test]
    fn test_derive_name_drops_and_strips() {
        assert_eq!(normalize_project_name("__My App.v2"), "myappv2");
        assert_eq!(normalize_project_name("-_-web"), "web");
        assert_eq!(normalize_project_name("a_-b"), "a_-b");
    }

    #[test]
    fn test_empty_working_dir_uses_fallback() {
        assert_eq!(derive_project_name(Path::new(""), "fakedc"), "fakedc");
        assert_eq!(derive_project_name(Path::new("/tmp/!!!"), "fakedc"), "fakedc");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for dir in ["My-App_2", "__x", "Hello World", "ÜberApp", "--", "a.b.c", "123"] {
            let once = normalize_project_name(dir);
            assert_eq!(normalize_project_name(&once), once, "input {:?}", dir);
        }
    }

    #[test]
    fn test_interpolate() {
        let env = env(&[("TAG", "1.0.0"), ("EMPTY", "")]);

        assert_eq!(interpolate("nginx:${TAG}", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("nginx:$TAG", &env).unwrap(), "nginx:1.0.0");
        assert_eq!(interpolate("${MISSING:-latest}", &env).unwrap(), "latest");
        assert_eq!(interpolate("${EMPTY:-fallback}", &env).unwrap(), "fallback");
        assert_eq!(interpolate("${EMPTY-fallback}", &env).unwrap(), "");
        assert_eq!(interpolate("$${TAG}", &env).unwrap(), "${TAG}");
        assert_eq!(interpolate("${MISSING}", &env).unwrap(), "");
    }

    #[test]
    fn test_interpolate_required() {
        let env = env(&[]);
        let err = interpolate("${DB_PASSWORD:?must be set}", &env).unwrap_err();
        assert!(matches!(err, ComposeError::ConfigParse(msg) if msg.contains("DB_PASSWORD")));
    }

    #[test]
    fn test_parse_env_file() {
        let content = r#"
# comment
export A=1
B = "two words"
C='single'
"#;
        let env = parse_env_file(content).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "two words");
        assert_eq!(env["C"], "single");

        assert!(parse_env_file("NOT_A_PAIR").is_err());
    }

    #[test]
    fn test_load_env_file_overlays() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(".env");
        std::fs::write(&path, "TAG=2\n").unwrap();

        let env = load_env_file(&path, env(&[("TAG", "1"), ("KEEP", "x")])).unwrap();
        assert_eq!(env["TAG"], "2");
        assert_eq!(env["KEEP"], "x");
    }

    #[test]
    fn test_load_simple_project() {
        let yaml = r#"
services:
  web:
    image: nginx:${TAG:-latest}
    ports:
      - "80:80"
    depends_on:
      - db
  db:
    image: postgres:13
    environment:
      POSTGRES_PASSWORD: secret
volumes:
  data:
"#;
        let details = ConfigDetails::new(yaml, "/src/Shop", env(&[]));
        let project = YamlProjectLoader::default().load(&details).unwrap();

        assert_eq!(project.name, "shop");
        assert_eq!(project.service_names(), vec!["db".to_string(), "web".to_string()]);
        assert_eq!(project.services["web"].image.as_deref(), Some("nginx:latest"));
        assert!(project.volumes.contains_key("data"));
        assert_eq!(project.start_order().unwrap(), vec!["db".to_string(), "web".to_string()]);
    }

    #[test]
    fn test_name_precedence() {
        let yaml = "name: FromFile\nservices:\n  web:\n    image: nginx\n";
        let loader = YamlProjectLoader::default();

        let details = ConfigDetails::new(yaml, "/src/dir", env(&[]));
        assert_eq!(loader.load(&details).unwrap().name, "fromfile");

        let details = details.project_name(Some("Explicit"));
        assert_eq!(loader.load(&details).unwrap().name, "explicit");

        let details = ConfigDetails::new(yaml, "/src/dir", env(&[(PROJECT_NAME_ENV, "from_env")]));
        assert_eq!(loader.load(&details).unwrap().name, "from_env");
    }

    #[test]
    fn test_empty_name_sources_are_skipped() {
        let yaml = "name: \"\"\nservices:\n  web:\n    image: nginx\n";
        let loader = YamlProjectLoader::default();

        let details = ConfigDetails::new(yaml, "/src/dir", env(&[(PROJECT_NAME_ENV, "from_env")]))
            .project_name(Some(""));
        assert_eq!(loader.load(&details).unwrap().name, "from_env");

        let details = ConfigDetails::new(yaml, "/src/dir", env(&[(PROJECT_NAME_ENV, "")]))
            .project_name(Some(""));
        assert_eq!(loader.load(&details).unwrap().name, "dir");
    }

    #[test]
    fn test_empty_dir_project_uses_fallback() {
        let yaml = "services:\n  web:\n    image: nginx\n";
        let details = ConfigDetails::new(yaml, "", env(&[]));
        assert_eq!(YamlProjectLoader::default().load(&details).unwrap().name, "fakedc");
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let details = ConfigDetails::new("services: [unclosed", "/src/app", env(&[]));
        let result = YamlProjectLoader::default().load(&details);
        assert!(matches!(result, Err(ComposeError::ConfigParse(_))));

        let details = ConfigDetails::new("", "/src/app", env(&[]));
        assert!(matches!(
            YamlProjectLoader::default().load(&details),
            Err(ComposeError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_missing_image_rejected() {
        let yaml = "services:\n  web:\n    ports:\n      - \"80:80\"\n";
        let details = ConfigDetails::new(yaml, "/src/app", env(&[]));
        assert!(YamlProjectLoader::default().load(&details).is_err());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let yaml = "services:\n  web:\n    image: nginx\n    depends_on: [api]\n";
        let details = ConfigDetails::new(yaml, "/src/app", env(&[]));
        assert!(YamlProjectLoader::default().load(&details).is_err());
    }

    #[test]
    fn test_profiles_filter_services() {
        let yaml = r#"
services:
  web:
    image: nginx
  debugger:
    image: busybox
    profiles: [debug]
"#;
        let loader = YamlProjectLoader::default();

        let details = ConfigDetails::new(yaml, "/src/app", env(&[]));
        let project = loader.load(&details).unwrap();
        assert_eq!(project.service_names(), vec!["web".to_string()]);
        assert_eq!(project.disabled_services, vec!["debugger".to_string()]);

        let details = details.profiles(&["debug".to_string()]);
        let project = loader.load(&details).unwrap();
        assert_eq!(project.services.len(), 2);
    }

    #[test]
    fn test_merge_files() {
        let base = "services:\n  web:\n    image: nginx:1\n    restart: always\n";
        let overlay = "services:\n  web:\n    image: nginx:2\n  cache:\n    image: redis\n";

        let details = ConfigDetails::new(base, "/src/app", env(&[])).config_text(overlay);
        let project = YamlProjectLoader::default().load(&details).unwrap();

        assert_eq!(project.services["web"].image.as_deref(), Some("nginx:2"));
        assert_eq!(project.services["web"].restart.as_deref(), Some("always"));
        assert!(project.services.contains_key("cache"));
    }

    #[test]
    fn test_circular_dependency_detection() {
        let yaml = r#"
services:
  a:
    image: nginx
    depends_on: [b]
  b:
    image: nginx
    depends_on: [a]
"#;
        let details = ConfigDetails::new(yaml, "/src/app", env(&[]));
        let project = YamlProjectLoader::default().load(&details).unwrap();
        assert!(project.start_order().is_err());
    }

    #[test]
    fn test_up_specs_carry_build_flag() {
        let yaml = r#"
services:
  api:
    build: ./api
  db:
    image: postgres
"#;
        let details = ConfigDetails::new(yaml, "/src/app", env(&[]));
        let specs = YamlProjectLoader::default().load(&details).unwrap().up_specs().unwrap();

        let api = specs.iter().find(|s| s.service() == "api").unwrap();
        let db = specs.iter().find(|s| s.service() == "db").unwrap();
        assert!(api.build());
        assert!(!db.build());
    }

    #[test]
    fn test_find_compose_file() {
        let temp = tempdir().unwrap();
        assert!(find_compose_file(temp.path()).is_none());

        std::fs::write(temp.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        let found = find_compose_file(temp.path()).unwrap();
        assert!(found.ends_with("docker-compose.yml"));
    }
}
