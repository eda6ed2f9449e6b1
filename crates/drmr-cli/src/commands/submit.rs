//! Submit command implementation.
//!
//! Parses a pipeline script and submits its jobs to the configured resource
//! manager, in dependency order.

use std::path::Path;

use anyhow::Result;
use console::style;

use drmr_sched::{Config, SubmitOptions, Submitter};

use super::common::{connect, load_config, read_script};

/// Execute the submit command.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    script: &Path,
    config_path: Option<&Path>,
    account: Option<String>,
    destination: Option<String>,
    job_name: Option<String>,
    mail_at_finish: bool,
    start_held: bool,
    max_concurrent: Option<u32>,
    wait_for: Vec<String>,
    completion_jobs: bool,
) -> Result<()> {
    let source = read_script(script)?;

    let overrides = Config {
        account,
        destination,
        mail_at_finish: mail_at_finish.then_some(true),
        ..Config::default()
    };
    let config = load_config(overrides, config_path)?;
    let manager = connect(&config).await?;

    if let Some(destination) = &config.destination {
        if !manager.validate_destination(destination).await {
            anyhow::bail!(
                "Invalid destination for {}: {destination}",
                manager.name()
            );
        }
    }

    println!(
        "{} Submitting {} to {}",
        style("→").cyan().bold(),
        style(script.display()).green(),
        style(manager.name()).magenta()
    );

    let options = SubmitOptions {
        job_name,
        start_held,
        mail_at_finish: config.mail_at_finish.unwrap_or(false),
        max_concurrent,
        wait_for,
        completion_jobs,
        ..SubmitOptions::default()
    };
    let submitter = Submitter::new(manager.as_ref(), config.job_defaults()?, options);
    let report = submitter.submit_script(&source).await?;

    for record in &report.records {
        println!(
            "  {} {} {}",
            style("●").green(),
            style(&record.job_name).bold(),
            record.submitted_id().unwrap_or("?")
        );
    }
    println!(
        "  Cancel with: {}",
        style(report.cancel_script.display()).dim()
    );
    if start_held {
        println!(
            "  {} Jobs were submitted held; release them to start the pipeline.",
            style("!").yellow().bold()
        );
    }

    println!();
    println!(
        "{} Submitted run {}",
        style("✓").green().bold(),
        style(&report.run_name).cyan()
    );

    // Downstream pipelines wait on the success job, so print it bare.
    match &report.success_job_id {
        Some(job_id) => println!("{job_id}"),
        None => println!("{}", report.job_ids().join(" ")),
    }

    Ok(())
}
