//! mcqforge-providers: local inference engine integrations.
//!
//! Implements the `InferenceEngine` trait for Ollama and llama.cpp servers,
//! plus a scripted engine for tests and offline runs, and the configuration
//! layer that picks one of them.

pub mod config;
pub mod llamacpp;
pub mod mock;
pub mod ollama;

pub use config::{
    build_generator, create_engine, load_config, load_config_from, EngineConfig,
    GenerationSettings, McqforgeConfig,
};
pub use mcqforge_core::error::ProviderError;
