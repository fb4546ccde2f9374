use crate::classify::classifier::Role;
use crate::discovery::model::ResourceKind;
use crate::discovery::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_DIR: &str = ".tfdiscover";
const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {signal} signal pattern '{pattern}': {source}")]
    InvalidPattern {
        signal: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid value '{value}' for {name}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub classifier: ClassifierConfig,
    pub generation: GenerationConfig,
    pub terraform: TerraformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub kinds: Vec<ResourceKind>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub command_timeout_secs: u64,
    pub gcloud_path: Option<String>,
    /// Regions scanned for region-scoped listings (VPC connectors)
    pub regions: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            kinds: ResourceKind::ALL.to_vec(),
            max_retries: 5,
            base_delay_ms: 1000,
            command_timeout_secs: 30,
            gcloud_path: None,
            regions: vec!["europe-north1".to_string()],
        }
    }
}

impl DiscoveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Environment variable name patterns used as role evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub frontend_signals: Vec<String>,
    pub backend_signals: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            frontend_signals: ["REACT_APP_", "VITE_", "NEXT_PUBLIC_", "VUE_APP_"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backend_signals: [
                "DATABASE_URL",
                "REDIS_URL",
                "SQLALCHEMY",
                "DJANGO_SETTINGS",
                "FASTAPI",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Directory holding the reusable modules, relative to the output directory
    pub modules_source: String,
    pub client: Option<String>,
    pub project: Option<String>,
    pub default_region: String,
    pub state_bucket: Option<String>,
    pub state_prefix: Option<String>,
    /// Service name to role, for services the classifier cannot decide
    pub role_overrides: BTreeMap<String, Role>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            modules_source: "../.terraform-modules".to_string(),
            client: None,
            project: None,
            default_region: "europe-north1".to_string(),
            state_bucket: None,
            state_prefix: None,
            role_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformConfig {
    pub executable_path: Option<String>,
    /// Total plan attempts; 2 means one retry
    pub plan_attempts: u32,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            plan_attempts: 2,
        }
    }
}

/// Load configuration from an explicit file path
pub fn init_from_path(path: &str) -> Result<Config, ConfigError> {
    let path = PathBuf::from(path);
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?
            .join(path)
    };

    tracing::info!("Loading config from {}", path.display());
    let mut config = read_file(&path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Load `~/.tfdiscover/config.json` if present, otherwise defaults
pub fn init_default() -> Result<Config, ConfigError> {
    let mut config = match default_path() {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            read_file(&path)?
        }
        _ => {
            tracing::debug!("No config file found, using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `TFDISCOVER_*` overrides; `lookup` abstracts the environment for tests
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(path) = non_empty("TFDISCOVER_GCLOUD_PATH") {
        config.discovery.gcloud_path = Some(path);
    }
    if let Some(path) = non_empty("TFDISCOVER_TERRAFORM_PATH") {
        config.terraform.executable_path = Some(path);
    }
    if let Some(value) = non_empty("TFDISCOVER_MAX_RETRIES") {
        config.discovery.max_retries = parse_env("TFDISCOVER_MAX_RETRIES", &value)?;
    }
    if let Some(value) = non_empty("TFDISCOVER_BASE_DELAY_MS") {
        config.discovery.base_delay_ms = parse_env("TFDISCOVER_BASE_DELAY_MS", &value)?;
    }
    if let Some(source) = non_empty("TFDISCOVER_MODULES_SOURCE") {
        config.generation.modules_source = source;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
