//! The `mcqforge prompt` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use mcqforge_core::invoker::{ModelHandle, ModelInvoker};
use mcqforge_providers::config::{create_engine, load_config_from};

pub async fn execute(text: String, max_tokens: u32, config_path: Option<PathBuf>) -> Result<()> {
    anyhow::ensure!(!text.trim().is_empty(), "prompt text must not be empty");
    anyhow::ensure!(max_tokens >= 1, "max-tokens must be at least 1");

    let config = load_config_from(config_path.as_deref())?;
    let engine = create_engine(&config.engine)?;
    let handle = ModelHandle::open(engine, config.generation.cache_capacity).await?;

    let mut invoker = ModelInvoker::new(Arc::new(handle));
    if let Some(timeout) = config.generation.attempt_timeout() {
        invoker = invoker.with_timeout(timeout);
    }

    let reply = invoker.invoke(&text, max_tokens).await?;
    println!("{reply}");
    Ok(())
}
