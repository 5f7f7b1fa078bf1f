//! The `leakbench list-models` command.

use std::path::PathBuf;

use anyhow::Result;

use leakbench_providers::config::load_config_from;
use leakbench_providers::create_backend;

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let backend = create_backend(&config.backend, config.timeout())?;
    let models = backend.list_models().await?;

    if models.is_empty() {
        println!("No models available on the {} backend.", backend.name());
        return Ok(());
    }

    println!("Backend: {}", backend.name());
    for model in &models {
        match model.size_bytes {
            Some(bytes) => println!("  {} ({:.1} GB)", model.name, bytes as f64 / 1e9),
            None => println!("  {}", model.name),
        }
    }

    Ok(())
}
