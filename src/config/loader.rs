//! Configuration Loader
//!
//! `mediaflow-config.yaml` carries base values for each engine section plus
//! optional `development` / `test` / `production` profiles. Loading happens in
//! three layers:
//!
//! 1. the base sections of the document,
//! 2. the profile named by the active environment, overlaid key by key,
//! 3. `MEDIAFLOW__SECTION__KEY` process variables.
//!
//! The result is validated before a [`ConfigManager`] is handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::MediaflowConfig;
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::HashMap;
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CONFIG_FILE_NAMES: [&str; 2] = ["mediaflow-config.yaml", "mediaflow-config.yml"];
const PROFILE_SECTIONS: [&str; 3] = ["development", "test", "production"];
const ENGINE_SECTIONS: [&str; 7] = [
    "environment",
    "resources",
    "load_balancer",
    "engine",
    "recovery",
    "queue",
    "events",
];
const ENV_PREFIX: &str = "MEDIAFLOW";
const CONFIG_DIR_VAR: &str = "MEDIAFLOW_CONFIG_DIR";
const MAX_DOCUMENT_BYTES: u64 = 1024 * 1024;

#[derive(Debug)]
pub struct ConfigManager {
    config: MediaflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment instead of reading `MEDIAFLOW_ENV`.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(config_search_root);
        let document = ConfigDocument::open(&config_directory)?;

        debug!(
            file = %document.path.display(),
            environment = environment,
            profiles = ?document.profiles.keys().collect::<Vec<_>>(),
            "Resolving mediaflow configuration"
        );

        let mut config = apply_env_layer(document.resolve(environment)?)?;
        config.environment = environment.to_string();
        config.validate()?;

        info!(
            environment = environment,
            max_concurrency = config.resources.max_concurrency,
            strategy = %config.load_balancer.strategy,
            queue_id = %config.queue.default_queue_id,
            journal = config.queue.journal_url.is_some(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedded use)
    pub fn from_config(config: MediaflowConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        let environment = if config.environment.is_empty() {
            Self::detect_environment()
        } else {
            config.environment.clone()
        };
        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &MediaflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// MEDIAFLOW_ENV, then APP_ENV, then `development`
    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }
}

/// `MEDIAFLOW_CONFIG_DIR`, otherwise the nearest `config/` holding a
/// mediaflow document in the working directory or up to two parents.
fn config_search_root() -> PathBuf {
    if let Ok(dir) = env::var(CONFIG_DIR_VAR) {
        return PathBuf::from(dir);
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.ancestors()
        .take(3)
        .map(|ancestor| ancestor.join("config"))
        .find(|dir| CONFIG_FILE_NAMES.iter().any(|name| dir.join(name).is_file()))
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// A parsed configuration file split into engine sections and profiles.
struct ConfigDocument {
    path: PathBuf,
    base: Mapping,
    profiles: HashMap<String, YamlValue>,
}

impl ConfigDocument {
    fn open(directory: &Path) -> ConfigResult<Self> {
        let path = locate(directory)?;
        let label = path.display().to_string();
        let text = read_bounded(&path)?;

        let parsed: YamlValue =
            serde_yaml::from_str(&text).map_err(|e| ConfigurationError::invalid_yaml(&*label, e))?;
        let mut base = match parsed {
            YamlValue::Mapping(map) => map,
            YamlValue::Null => Mapping::new(),
            other => {
                return Err(ConfigurationError::invalid_yaml(
                    label,
                    format!("expected a mapping of sections, found {}", yaml_kind(&other)),
                ))
            }
        };

        let profiles = PROFILE_SECTIONS
            .iter()
            .filter_map(|name| {
                base.remove(*name)
                    .map(|profile| (name.to_string(), profile))
            })
            .collect();

        for section in unknown_sections(&base) {
            warn!(file = %label, section = %section, "Ignoring unknown configuration section");
        }

        Ok(Self {
            path,
            base,
            profiles,
        })
    }

    /// Base sections with the named profile laid over them
    fn resolve(&self, environment: &str) -> ConfigResult<MediaflowConfig> {
        let mut merged = YamlValue::Mapping(self.base.clone());
        if let Some(profile) = self.profiles.get(environment) {
            debug!(environment = environment, "Applying configuration profile");
            overlay(&mut merged, profile.clone());
        }

        serde_yaml::from_value(merged).map_err(|e| {
            ConfigurationError::invalid_yaml(
                self.path.display().to_string(),
                format!("section does not match the engine schema: {e}"),
            )
        })
    }
}

fn locate(directory: &Path) -> ConfigResult<PathBuf> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_NAMES
        .iter()
        .map(|name| directory.join(name))
        .collect();

    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(ConfigurationError::config_file_not_found(candidates)),
    }
}

/// Reads at most `MAX_DOCUMENT_BYTES`; anything longer is rejected.
fn read_bounded(path: &Path) -> ConfigResult<String> {
    let label = path.display().to_string();
    let file =
        std::fs::File::open(path).map_err(|e| ConfigurationError::file_read_error(&*label, e))?;

    let mut text = String::new();
    file.take(MAX_DOCUMENT_BYTES + 1)
        .read_to_string(&mut text)
        .map_err(|e| ConfigurationError::file_read_error(&*label, e))?;

    if text.len() as u64 > MAX_DOCUMENT_BYTES {
        return Err(ConfigurationError::invalid_value(
            "config_file",
            label,
            format!("document exceeds {MAX_DOCUMENT_BYTES} bytes"),
        ));
    }
    Ok(text)
}

/// Top-level keys that are neither engine sections nor profiles
fn unknown_sections(sections: &Mapping) -> Vec<String> {
    sections
        .keys()
        .filter_map(|key| match key.as_str() {
            Some(name) if ENGINE_SECTIONS.contains(&name) => None,
            Some(name) => Some(name.to_string()),
            None => Some(format!("{key:?}")),
        })
        .collect()
}

/// Mappings merge key by key; any other value replaces what it lands on.
fn overlay(target: &mut YamlValue, layer: YamlValue) {
    match (target, layer) {
        (YamlValue::Mapping(existing), YamlValue::Mapping(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Re-read a resolved configuration through `config` so `MEDIAFLOW__*`
/// variables win over file values.
fn apply_env_layer(resolved: MediaflowConfig) -> ConfigResult<MediaflowConfig> {
    let serialized =
        serde_yaml::to_string(&resolved).map_err(|e| ConfigurationError::ConfigMergeError {
            error: e.to_string(),
        })?;

    config::Config::builder()
        .add_source(config::File::from_str(&serialized, config::FileFormat::Yaml))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|layered| layered.try_deserialize::<MediaflowConfig>())
        .map_err(|e| ConfigurationError::EnvironmentOverrideError {
            error: e.to_string(),
        })
}

fn yaml_kind(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "a boolean",
        YamlValue::Number(_) => "a number",
        YamlValue::String(_) => "a string",
        YamlValue::Sequence(_) => "a sequence",
        YamlValue::Mapping(_) => "a mapping",
        YamlValue::Tagged(_) => "a tagged value",
    }
}
