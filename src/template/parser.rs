//! Template file parser

use super::config::{EnvironmentConfig, WaitStrategy};
use super::env_file::load_env_files;
use crate::error::{RepdevError, Result};
use crate::ownership::{derive_run_label, resolve_template_path};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

/// Default template file names, in lookup order
pub const DEFAULT_TEMPLATE_FILES: &[&str] = &["repdev.yml", "repdev.yaml"];

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable pattern is valid")
});

static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("container name pattern is valid")
});

/// Template file parser
pub struct TemplateParser;

impl TemplateParser {
    /// Find a template file in directory
    pub fn find_template_file(dir: &Path) -> Option<PathBuf> {
        DEFAULT_TEMPLATE_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Parse template from path.
    ///
    /// Relative paths inside the template (env files, bind mounts) resolve
    /// against the template's directory, and the run label is derived from
    /// the resolved path.
    pub fn parse_file(path: &Path) -> Result<EnvironmentConfig> {
        if !path.exists() {
            return Err(RepdevError::TemplateNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| RepdevError::TemplateParse(format!("Failed to read {}: {}", path.display(), e)))?;

        let resolved = resolve_template_path(path);
        let root = resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = Self::parse_in(&content, &root, &process_env())?;
        config.run_label = Some(derive_run_label(&resolved));
        config.template_path = Some(resolved);

        info!(
            template = %path.display(),
            version = config.version.as_deref().unwrap_or("unversioned"),
            services = config.services.len(),
            "Template loaded"
        );

        Ok(config)
    }

    /// Parse template from string, resolving relative paths against the
    /// working directory. The result carries no run label.
    pub fn parse_str(content: &str) -> Result<EnvironmentConfig> {
        Self::parse_in(content, Path::new("."), &process_env())
    }

    fn parse_in(content: &str, root: &Path, env: &HashMap<String, String>) -> Result<EnvironmentConfig> {
        let mut config: EnvironmentConfig = serde_yaml::from_str(content)
            .map_err(|e| RepdevError::TemplateParse(format!("Failed to parse YAML: {}", e)))?;

        Self::apply_env_files(&mut config, root);
        Self::interpolate(&mut config, env);

        for warning in Self::validate(&config)? {
            warn!("{}", warning);
        }

        Ok(config)
    }

    /// Merge `env_file` contents under each service's inline environment.
    fn apply_env_files(config: &mut EnvironmentConfig, root: &Path) {
        for service in config.services.values_mut() {
            let Some(ref env_file) = service.env_file else {
                continue;
            };

            let mut merged = load_env_files(&env_file.files(), root);
            for (key, value) in service.environment.0.drain(..) {
                merged.insert(key, value);
            }
            service.environment.0 = merged;
        }
    }

    /// Interpolate `${VAR}`, `$VAR` and `${VAR:-default}` in images and
    /// environment values. `$$` yields a literal `$`.
    pub fn interpolate(config: &mut EnvironmentConfig, env: &HashMap<String, String>) {
        for service in config.services.values_mut() {
            service.image = interpolate_string(&service.image, env);

            for value in service.environment.0.values_mut() {
                *value = interpolate_string(value, env);
            }
        }
    }

    /// Validate template configuration, returning non-fatal warnings
    pub fn validate(config: &EnvironmentConfig) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        let mut container_names = HashSet::new();

        if config.services.is_empty() {
            warnings.push("Template declares no services".to_string());
        }

        for (index, (name, service)) in config.services.iter().enumerate() {
            if service.image.trim().is_empty() {
                return Err(RepdevError::invalid_config(format!(
                    "Service '{}' must specify an image",
                    name
                )));
            }

            if let Some(ref container_name) = service.container_name {
                if !CONTAINER_NAME.is_match(container_name) {
                    return Err(RepdevError::invalid_config(format!(
                        "Service '{}' has invalid container_name '{}'",
                        name, container_name
                    )));
                }
                if !container_names.insert(container_name.as_str()) {
                    return Err(RepdevError::invalid_config(format!(
                        "container_name '{}' is used by more than one service",
                        container_name
                    )));
                }
            }

            for dep in &service.depends_on {
                match config.services.get_index_of(dep) {
                    None => {
                        return Err(RepdevError::invalid_config(format!(
                            "Service '{}' depends on unknown service '{}'",
                            name, dep
                        )))
                    }
                    Some(dep_index) if dep_index > index => warnings.push(format!(
                        "Service '{}' depends on '{}' which is declared later; services start in declaration order",
                        name, dep
                    )),
                    Some(_) => {}
                }
            }

            match service.wait_for {
                Some(WaitStrategy::Http { ref url, .. })
                    if !(url.starts_with("http://") || url.starts_with("https://")) =>
                {
                    return Err(RepdevError::invalid_config(format!(
                        "Service '{}' wait_for url must be http(s): {}",
                        name, url
                    )));
                }
                Some(WaitStrategy::Tcp { port: 0, .. }) => {
                    return Err(RepdevError::invalid_config(format!(
                        "Service '{}' wait_for port must be non-zero",
                        name
                    )));
                }
                Some(WaitStrategy::ContainerHealthy { container: None, .. })
                    if service.container_name.is_none() =>
                {
                    warnings.push(format!(
                        "Service '{}' waits for health without a container_name; the created container is inspected",
                        name
                    ));
                }
                _ => {}
            }

            if service.container_name.is_none() {
                warnings.push(format!(
                    "Service '{}' has no container_name; teardown can only find it by ownership label",
                    name
                ));
            }
        }

        Ok(warnings)
    }
}

fn process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Interpolate environment variables in a string
fn interpolate_string(s: &str, env: &HashMap<String, String>) -> String {
    VARIABLE
        .replace_all(s, |caps: &Captures| {
            if &caps[0] == "$$" {
                return "$".to_string();
            }
            let (var, default) = match caps.get(1) {
                Some(braced) => (braced.as_str(), caps.get(2).map(|d| d.as_str())),
                None => (&caps[3], None),
            };
            match (env.get(var), default) {
                (Some(value), Some(default)) if value.is_empty() => default.to_string(),
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.to_string(),
                (None, None) => String::new(),
            }
        })
        .into_owned()
}
