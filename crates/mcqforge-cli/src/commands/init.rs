//! The `mcqforge init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("mcqforge.toml").exists() {
        println!("mcqforge.toml already exists, skipping.");
        return Ok(());
    }

    std::fs::write("mcqforge.toml", SAMPLE_CONFIG)?;
    println!("Created mcqforge.toml");

    println!("\nNext steps:");
    println!("  1. Pull the model: ollama pull gemma3:1b");
    println!("  2. Run: mcqforge check");
    println!("  3. Run: mcqforge generate --topic \"Present Simple tense\" --count 3");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# mcqforge configuration

[engine]
type = "ollama"
base_url = "http://localhost:11434"
model = "gemma3:1b"

# A llama.cpp server works too:
# [engine]
# type = "llamacpp"
# base_url = "http://localhost:8080"
# api_key = "${LLAMA_API_KEY}"

[generation]
retries_per_question = 3
max_count = 10
cache_capacity = 100
attempt_timeout_secs = 120
strategy = "single"
"#;
