//! Shared helpers for CLI commands.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use drmr_sched::{Config, ResourceManager, SystemRunner, resource_manager};

/// Backfill command-line settings from the configuration file.
pub fn load_config(overrides: Config, path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }
    }
    Ok(overrides.load(path)?)
}

/// The resource manager the configuration selects, driving real commands.
pub async fn connect(config: &Config) -> Result<Box<dyn ResourceManager>> {
    let runner = Arc::new(SystemRunner::new());
    let kind = config.resolve_resource_manager(runner.clone()).await?;
    tracing::debug!("Using resource manager {kind}");
    Ok(resource_manager(kind, runner))
}

/// Read a pipeline script from a file, or from stdin when the path is `-`.
pub fn read_script(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut script = String::new();
        std::io::stdin()
            .read_to_string(&mut script)
            .context("Failed to read the pipeline script from standard input")?;
        return Ok(script);
    }

    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
}
