//! Configuration loading, validation, and management for Cogloop.
//!
//! Loads configuration from `~/.cogloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use cogloop_core::provider::{DecodingParams, ModelRole};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cogloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model weights and runtime settings
    #[serde(default)]
    pub models: ModelsConfig,

    /// Per-role decoding defaults
    #[serde(default)]
    pub decoding: DecodingConfig,

    /// Reasoning loop limits
    #[serde(default)]
    pub engine: EngineConfig,

    /// Event pipeline settings
    #[serde(default)]
    pub events: EventsConfig,
}

/// Where a role's weights live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// GGUF file, relative to `models.base_dir` unless absolute
    pub file: String,

    /// tokenizer.json; defaults to `<file stem>.tokenizer.json` next to the weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model_dir")]
    pub base_dir: PathBuf,

    #[serde(default = "default_context_size")]
    pub context_size: u32,

    /// Requested acceleration level (offloaded layers); 0 = CPU only
    #[serde(default = "default_acceleration_level")]
    pub acceleration_level: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_primary_spec")]
    pub primary: ModelSpec,

    #[serde(default = "default_secondary_spec")]
    pub secondary: ModelSpec,
}

fn default_model_dir() -> PathBuf {
    AppConfig::config_dir().join("models")
}
fn default_context_size() -> u32 {
    8192
}
fn default_acceleration_level() -> u32 {
    35
}
fn default_batch_size() -> u32 {
    512
}
fn default_seed() -> u64 {
    1337
}
fn default_primary_spec() -> ModelSpec {
    ModelSpec {
        file: "Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf".into(),
        tokenizer: None,
    }
}
fn default_secondary_spec() -> ModelSpec {
    ModelSpec {
        file: "Llama-3.2-3B-Instruct-Q4_K_M.gguf".into(),
        tokenizer: None,
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_model_dir(),
            context_size: default_context_size(),
            acceleration_level: default_acceleration_level(),
            batch_size: default_batch_size(),
            seed: default_seed(),
            primary: default_primary_spec(),
            secondary: default_secondary_spec(),
        }
    }
}

impl ModelsConfig {
    pub fn spec(&self, role: ModelRole) -> &ModelSpec {
        match role {
            ModelRole::Primary => &self.primary,
            ModelRole::Secondary => &self.secondary,
        }
    }

    /// Absolute path of a role's weights file.
    pub fn weights_path(&self, role: ModelRole) -> PathBuf {
        self.resolve(&self.spec(role).file)
    }

    /// Absolute path of a role's tokenizer file.
    pub fn tokenizer_path(&self, role: ModelRole) -> PathBuf {
        match &self.spec(role).tokenizer {
            Some(tokenizer) => self.resolve(tokenizer),
            None => {
                let weights = self.weights_path(role);
                let stem = weights
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| role.to_string());
                weights.with_file_name(format!("{stem}.tokenizer.json"))
            }
        }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodingConfig {
    #[serde(default = "default_primary_decoding")]
    pub primary: DecodingParams,

    #[serde(default = "default_secondary_decoding")]
    pub secondary: DecodingParams,
}

fn default_primary_decoding() -> DecodingParams {
    DecodingParams {
        temperature: 0.1,
        max_tokens: 2048,
        top_p: 0.95,
    }
}
fn default_secondary_decoding() -> DecodingParams {
    DecodingParams {
        temperature: 0.2,
        max_tokens: 1024,
        top_p: 0.95,
    }
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_decoding(),
            secondary: default_secondary_decoding(),
        }
    }
}

impl DecodingConfig {
    pub fn for_role(&self, role: ModelRole) -> DecodingParams {
        match role {
            ModelRole::Primary => self.primary,
            ModelRole::Secondary => self.secondary,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reflect stages after which the loop always finishes
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Planner attempts before settling for an empty plan
    #[serde(default = "default_planner_attempts")]
    pub planner_attempts: u32,

    /// Characters kept in prompt/response/output previews
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_planner_attempts() -> u32 {
    2
}
fn default_preview_chars() -> usize {
    400
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            planner_attempts: default_planner_attempts(),
            preview_chars: default_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Buffer size for each buffered subscriber
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.cogloop/config.toml),
    /// then apply environment overrides:
    /// - `COGLOOP_MODEL_DIR`
    /// - `COGLOOP_CTX`, `COGLOOP_BATCH`, `COGLOOP_SEED`
    /// - `COGLOOP_ACCELERATION`
    /// - `COGLOOP_PRIMARY_MODEL_FILE`, `COGLOOP_SECONDARY_MODEL_FILE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("COGLOOP_MODEL_DIR") {
            self.models.base_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("COGLOOP_CTX") {
            self.models.context_size = parse_env("COGLOOP_CTX", &value)?;
        }
        if let Some(value) = lookup("COGLOOP_ACCELERATION") {
            self.models.acceleration_level = parse_env("COGLOOP_ACCELERATION", &value)?;
        }
        if let Some(value) = lookup("COGLOOP_BATCH") {
            self.models.batch_size = parse_env("COGLOOP_BATCH", &value)?;
        }
        if let Some(value) = lookup("COGLOOP_SEED") {
            self.models.seed = parse_env("COGLOOP_SEED", &value)?;
        }
        if let Some(file) = lookup("COGLOOP_PRIMARY_MODEL_FILE") {
            self.models.primary.file = file;
        }
        if let Some(file) = lookup("COGLOOP_SECONDARY_MODEL_FILE") {
            self.models.secondary.file = file;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cogloop")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for role in ModelRole::ALL {
            let params = self.decoding.for_role(role);
            if !(0.0..=2.0).contains(&params.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "decoding.{role}.temperature must be between 0.0 and 2.0"
                )));
            }
            if !(params.top_p > 0.0 && params.top_p <= 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "decoding.{role}.top_p must be in (0.0, 1.0]"
                )));
            }
            if params.max_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "decoding.{role}.max_tokens must be > 0"
                )));
            }
        }

        if self.engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be >= 1".into(),
            ));
        }

        if self.engine.planner_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "engine.planner_attempts must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
