//! Engine configuration and factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mcqforge_core::engine::{Generator, GeneratorConfig};
use mcqforge_core::invoker::{ModelHandle, ModelInvoker};
use mcqforge_core::model::Strategy;
use mcqforge_core::traits::InferenceEngine;

use crate::llamacpp::{self, LlamaCppEngine};
use crate::mock::MockEngine;
use crate::ollama::{self, OllamaEngine};

/// Which local backend hosts the model.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EngineConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        #[serde(default = "default_ollama_model")]
        model: String,
    },
    LlamaCpp {
        #[serde(default = "default_llamacpp_url")]
        base_url: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        api_key: Option<String>,
    },
    /// Replays fixed responses; no model involved.
    Scripted {
        #[serde(default)]
        responses: Vec<String>,
    },
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineConfig::Ollama { base_url, model } => f
                .debug_struct("Ollama")
                .field("base_url", base_url)
                .field("model", model)
                .finish(),
            EngineConfig::LlamaCpp {
                base_url,
                model,
                api_key,
            } => f
                .debug_struct("LlamaCpp")
                .field("base_url", base_url)
                .field("model", model)
                .field("api_key", &api_key.as_ref().map(|_| "***"))
                .finish(),
            EngineConfig::Scripted { responses } => f
                .debug_struct("Scripted")
                .field("responses", &responses.len())
                .finish(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Ollama {
            base_url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

fn default_ollama_url() -> String {
    ollama::DEFAULT_BASE_URL.to_string()
}
fn default_ollama_model() -> String {
    ollama::DEFAULT_MODEL.to_string()
}
fn default_llamacpp_url() -> String {
    llamacpp::DEFAULT_BASE_URL.to_string()
}

/// Generation limits and behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Model calls allowed per requested question.
    #[serde(default = "default_retries")]
    pub retries_per_question: u32,
    /// Largest count a request may ask for.
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    /// Prompt cache entries; 0 disables caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Per-call timeout in seconds; 0 disables it.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default)]
    pub strategy: Strategy,
}

fn default_retries() -> u32 {
    3
}
fn default_max_count() -> usize {
    10
}
fn default_cache_capacity() -> usize {
    100
}
fn default_attempt_timeout() -> u64 {
    120
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            retries_per_question: default_retries(),
            max_count: default_max_count(),
            cache_capacity: default_cache_capacity(),
            attempt_timeout_secs: default_attempt_timeout(),
            strategy: Strategy::default(),
        }
    }
}

impl GenerationSettings {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            retries_per_question: self.retries_per_question,
            max_count: self.max_count,
            strategy: self.strategy,
        }
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }
}

/// Top-level mcqforge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McqforgeConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub generation: GenerationSettings,
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
    }
    result
}

fn resolve_engine_config(config: &EngineConfig) -> EngineConfig {
    match config {
        EngineConfig::Ollama { base_url, model } => EngineConfig::Ollama {
            base_url: resolve_env_vars(base_url),
            model: resolve_env_vars(model),
        },
        EngineConfig::LlamaCpp {
            base_url,
            model,
            api_key,
        } => EngineConfig::LlamaCpp {
            base_url: resolve_env_vars(base_url),
            model: model.as_deref().map(resolve_env_vars),
            api_key: api_key.as_deref().map(resolve_env_vars),
        },
        EngineConfig::Scripted { responses } => EngineConfig::Scripted {
            responses: responses.clone(),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `mcqforge.toml` in the current directory
/// 2. `~/.config/mcqforge/config.toml`
///
/// Environment variable overrides: `MCQFORGE_OLLAMA_URL`, `MCQFORGE_MODEL`.
pub fn load_config() -> Result<McqforgeConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<McqforgeConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("mcqforge.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|dir| dir.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<McqforgeConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => McqforgeConfig::default(),
    };

    apply_env_overrides(&mut config);
    config.engine = resolve_engine_config(&config.engine);

    tracing::debug!(engine = ?config.engine, "configuration loaded");
    Ok(config)
}

fn apply_env_overrides(config: &mut McqforgeConfig) {
    if let Ok(url) = std::env::var("MCQFORGE_OLLAMA_URL") {
        if let EngineConfig::Ollama { base_url, .. } = &mut config.engine {
            *base_url = url;
        }
    }

    if let Ok(name) = std::env::var("MCQFORGE_MODEL") {
        match &mut config.engine {
            EngineConfig::Ollama { model, .. } => *model = name,
            EngineConfig::LlamaCpp { model, .. } => *model = Some(name),
            EngineConfig::Scripted { .. } => {}
        }
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("mcqforge"))
}

/// Create an engine instance from its configuration.
pub fn create_engine(config: &EngineConfig) -> Result<Box<dyn InferenceEngine>> {
    match config {
        EngineConfig::Ollama { base_url, model } => {
            Ok(Box::new(OllamaEngine::new(base_url, model)?))
        }
        EngineConfig::LlamaCpp {
            base_url,
            model,
            api_key,
        } => Ok(Box::new(LlamaCppEngine::new(
            base_url,
            model.clone(),
            api_key.clone(),
        )?)),
        EngineConfig::Scripted { responses } => {
            Ok(Box::new(MockEngine::with_script(responses.clone())))
        }
    }
}

/// Load the configured model and wire up a ready-to-use generator.
pub async fn build_generator(config: &McqforgeConfig) -> Result<Generator> {
    let engine = create_engine(&config.engine)?;
    let handle = ModelHandle::open(engine, config.generation.cache_capacity).await?;

    let mut invoker = ModelInvoker::new(Arc::new(handle));
    if let Some(timeout) = config.generation.attempt_timeout() {
        invoker = invoker.with_timeout(timeout);
    }

    Ok(Generator::new(invoker, config.generation.generator_config()))
}
