//! Inference configuration.
//!
//! Selects the enrichment provider (`llm` or `mock`) and, for `llm`, the
//! generation backend. Configuration can be loaded from:
//! - a TOML file with an `[inference]` table (path in `LORE_CONFIG`)
//! - environment variables (`LORE_*` prefixed)
//!
//! # Example
//!
//! ```toml
//! [inference]
//! provider = "llm"
//! backend = "ollama"
//! batch_size = 10
//! batch_delay_ms = 1000
//!
//! [inference.ollama]
//! url = "http://localhost:11434"
//! model = "llama3.1:8b"
//!
//! [inference.openai]
//! url = "https://api.openai.com/v1"
//! api_key = "${OPENAI_API_KEY}"
//! model = "gpt-4o-mini"
//! ```
//!
//! Nothing outside this module reads the environment. Callers load an
//! [`InferenceConfig`] once and hand it to [`build_provider`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use lore_core::defaults;
use lore_core::GenerationBackend;

use crate::mock::MockProvider;
use crate::provider::{GenerationProvider, LlmProvider, ProviderSettings};

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_VAR: &str = "LORE_CONFIG";

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid placeholder pattern")
});

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing configuration for selected backend: {0}")]
    MissingBackend(String),

    #[error("Failed to construct backend: {0}")]
    Backend(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which [`GenerationProvider`] implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Llm,
    Mock,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "mock" => Ok(Self::Mock),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm => write!(f, "llm"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Generation backend behind the `llm` provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    OpenAI,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(ConfigError::InvalidBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

fn default_timeout_secs() -> u64 {
    defaults::GEN_TIMEOUT_SECS
}

fn default_batch_size() -> usize {
    defaults::BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    defaults::BATCH_DELAY_MS
}

fn validate_endpoint(name: &str, url: &str, model: &str) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} url cannot be empty",
            name
        )));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{} url must start with http:// or https://, got: {}",
            name, url
        )));
    }
    if model.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{} model cannot be empty",
            name
        )));
    }
    Ok(())
}

/// Ollama section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaSection {
    pub url: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            url: defaults::OLLAMA_URL.to_string(),
            model: defaults::GEN_MODEL.to_string(),
            timeout_secs: defaults::GEN_TIMEOUT_SECS,
        }
    }
}

/// OpenAI-compatible section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAISection {
    pub url: String,
    /// Optional for local OpenAI-compatible servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAISection {
    fn default() -> Self {
        Self {
            url: defaults::OPENAI_URL.to_string(),
            api_key: None,
            model: defaults::OPENAI_GEN_MODEL.to_string(),
            timeout_secs: defaults::GEN_TIMEOUT_SECS,
        }
    }
}

/// Main inference configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<OllamaSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAISection>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Llm,
            backend: BackendKind::Ollama,
            batch_size: defaults::BATCH_SIZE,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
            ollama: Some(OllamaSection::default()),
            openai: None,
        }
    }
}

impl InferenceConfig {
    /// Configuration for the deterministic mock provider.
    pub fn mock() -> Self {
        Self {
            provider: ProviderKind::Mock,
            ..Self::default()
        }
    }

    /// Load from the file named by `LORE_CONFIG`, falling back to environment
    /// variables when it is unset or missing.
    pub fn load() -> ConfigResult<Self> {
        match env::var(CONFIG_PATH_VAR) {
            Ok(path) if Path::new(&path).exists() => {
                info!("Loading inference config from: {}", path);
                Self::from_file(Path::new(&path))
            }
            Ok(path) => {
                debug!(
                    "Config file not found at {}, using environment variables",
                    path
                );
                Self::from_env()
            }
            Err(_) => Self::from_env(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document containing an `[inference]` table.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        #[derive(Deserialize)]
        struct TomlRoot {
            inference: InferenceConfig,
        }

        let content = Self::substitute_env_vars(content);
        let root: TomlRoot = toml::from_str(&content)?;
        root.inference.validate()?;
        Ok(root.inference)
    }

    /// Load configuration from `LORE_*` environment variables.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// The section for the selected backend is always present, filled from
    /// defaults where variables are unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match lookup("LORE_PROVIDER") {
            Some(s) => s.parse()?,
            None => ProviderKind::default(),
        };
        let backend = match lookup("LORE_INFERENCE_BACKEND") {
            Some(s) => s.parse()?,
            None => BackendKind::default(),
        };

        let number = |key: &str, default: u64| -> ConfigResult<u64> {
            match lookup(key) {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    ConfigError::Validation(format!("{} must be an integer, got: {}", key, raw))
                }),
                None => Ok(default),
            }
        };

        let batch_size = number("LORE_BATCH_SIZE", defaults::BATCH_SIZE as u64)? as usize;
        let batch_delay_ms = number("LORE_BATCH_DELAY_MS", defaults::BATCH_DELAY_MS)?;

        let ollama = match backend {
            BackendKind::Ollama => Some(OllamaSection {
                url: lookup("LORE_OLLAMA_URL").unwrap_or_else(|| defaults::OLLAMA_URL.to_string()),
                model: lookup("LORE_OLLAMA_MODEL")
                    .unwrap_or_else(|| defaults::GEN_MODEL.to_string()),
                timeout_secs: number("LORE_OLLAMA_TIMEOUT_SECS", defaults::GEN_TIMEOUT_SECS)?,
            }),
            BackendKind::OpenAI => None,
        };

        let openai = match backend {
            BackendKind::OpenAI => Some(OpenAISection {
                url: lookup("LORE_OPENAI_URL").unwrap_or_else(|| defaults::OPENAI_URL.to_string()),
                api_key: lookup("LORE_OPENAI_API_KEY").filter(|k| !k.is_empty()),
                model: lookup("LORE_OPENAI_MODEL")
                    .unwrap_or_else(|| defaults::OPENAI_GEN_MODEL.to_string()),
                timeout_secs: number("LORE_OPENAI_TIMEOUT_SECS", defaults::GEN_TIMEOUT_SECS)?,
            }),
            BackendKind::Ollama => None,
        };

        let config = Self {
            provider,
            backend,
            batch_size,
            batch_delay_ms,
            ollama,
            openai,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            batch_size: self.batch_size.max(1),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }

    /// Validate the configuration.
    ///
    /// The mock provider needs no backend, so backend sections are only
    /// checked when present or when `provider = "llm"` requires one.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }

        if self.provider == ProviderKind::Llm {
            match self.backend {
                BackendKind::Ollama if self.ollama.is_none() => {
                    return Err(ConfigError::MissingBackend(
                        "ollama is selected but [inference.ollama] is not configured".to_string(),
                    ));
                }
                BackendKind::OpenAI if self.openai.is_none() => {
                    return Err(ConfigError::MissingBackend(
                        "openai is selected but [inference.openai] is not configured".to_string(),
                    ));
                }
                _ => {}
            }
        }

        if let Some(ref ollama) = self.ollama {
            validate_endpoint("ollama", &ollama.url, &ollama.model)?;
        }
        if let Some(ref openai) = self.openai {
            validate_endpoint("openai", &openai.url, &openai.model)?;
        }

        Ok(())
    }

    /// Substitute environment variables in the format ${VAR_NAME}.
    ///
    /// Unset variables are left as written.
    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

/// Construct the generation backend selected by `config.backend`.
pub fn build_backend(config: &InferenceConfig) -> ConfigResult<Arc<dyn GenerationBackend>> {
    match config.backend {
        BackendKind::Ollama => {
            let section = config
                .ollama
                .clone()
                .ok_or_else(|| ConfigError::MissingBackend("ollama".to_string()))?;
            build_ollama(section)
        }
        BackendKind::OpenAI => {
            let section = config
                .openai
                .clone()
                .ok_or_else(|| ConfigError::MissingBackend("openai".to_string()))?;
            build_openai(section)
        }
    }
}

#[cfg(feature = "ollama")]
fn build_ollama(section: OllamaSection) -> ConfigResult<Arc<dyn GenerationBackend>> {
    let backend =
        crate::ollama::OllamaBackend::with_config(section.url, section.model, section.timeout_secs)
            .map_err(|e| ConfigError::Backend(e.to_string()))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "ollama"))]
fn build_ollama(_section: OllamaSection) -> ConfigResult<Arc<dyn GenerationBackend>> {
    Err(ConfigError::InvalidBackend(
        "ollama (crate built without the `ollama` feature)".to_string(),
    ))
}

#[cfg(feature = "openai")]
fn build_openai(section: OpenAISection) -> ConfigResult<Arc<dyn GenerationBackend>> {
    let backend = crate::openai::OpenAIBackend::new(crate::openai::OpenAIConfig {
        base_url: section.url,
        api_key: section.api_key,
        gen_model: section.model,
        timeout_seconds: section.timeout_secs,
    })
    .map_err(|e| ConfigError::Backend(e.to_string()))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "openai"))]
fn build_openai(_section: OpenAISection) -> ConfigResult<Arc<dyn GenerationBackend>> {
    Err(ConfigError::InvalidBackend(
        "openai (crate built without the `openai` feature)".to_string(),
    ))
}

/// Construct the provider selected by `config.provider`.
pub fn build_provider(config: &InferenceConfig) -> ConfigResult<Arc<dyn GenerationProvider>> {
    config.validate()?;
    match config.provider {
        ProviderKind::Mock => {
            info!(provider = "mock", "Using deterministic mock provider");
            Ok(Arc::new(MockProvider::new()))
        }
        ProviderKind::Llm => {
            let backend = build_backend(config)?;
            info!(
                provider = "llm",
                backend = %config.backend,
                model = backend.model_name(),
                batch_size = config.batch_size,
                "Using model-backed provider"
            );
            Ok(Arc::new(
                LlmProvider::new(backend).with_settings(config.provider_settings()),
            ))
        }
    }
}
