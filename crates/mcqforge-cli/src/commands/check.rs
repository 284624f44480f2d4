//! The `mcqforge check` command.

use std::path::PathBuf;

use anyhow::Result;

use mcqforge_core::invoker::ModelHandle;
use mcqforge_providers::config::{create_engine, load_config_from, EngineConfig};
use mcqforge_providers::ollama::OllamaEngine;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    println!("Engine: {:?}", config.engine);

    if let EngineConfig::Ollama { base_url, model } = &config.engine {
        let ollama = OllamaEngine::new(base_url, model)?;
        let models = ollama.list_models().await?;
        println!("Installed models:");
        if models.is_empty() {
            println!("  (none)");
        }
        for name in &models {
            let marker = if name == model { "*" } else { " " };
            println!("  {marker} {name}");
        }
    }

    let handle = ModelHandle::open(create_engine(&config.engine)?, 0).await?;
    println!("Model ready ({}).", handle.engine_name());
    Ok(())
}
