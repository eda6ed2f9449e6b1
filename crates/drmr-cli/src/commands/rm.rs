//! Rm command implementation.

use std::path::Path;

use anyhow::Result;
use console::style;

use drmr_sched::{Config, DeletionRequest, JobFilter};

use super::common::{connect, load_config};

/// Execute the rm command.
pub async fn execute(
    config_path: Option<&Path>,
    ids: Vec<String>,
    name: Option<String>,
    owner: Option<String>,
    dry_run: bool,
) -> Result<()> {
    if ids.is_empty() && name.is_none() {
        anyhow::bail!("Give job ids or a --name to match; refusing to delete every job");
    }

    let config = load_config(Config::default(), config_path)?;
    let manager = connect(&config).await?;

    let request = DeletionRequest {
        filter: JobFilter {
            ids: ids.into_iter().collect(),
            name,
            owner,
        },
        dry_run,
    };
    let targets = manager.delete_jobs(&request).await?;

    if targets.is_empty() {
        println!("{} No matching jobs", style("○").yellow());
        return Ok(());
    }

    let verb = if dry_run { "Would delete" } else { "Deleted" };
    println!(
        "{} {verb} {} job(s) on {}:",
        style("→").cyan().bold(),
        targets.len(),
        style(manager.name()).magenta()
    );
    for job_id in &targets {
        println!("  {job_id}");
    }

    Ok(())
}
