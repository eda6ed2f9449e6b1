//! Backends command implementation.

use std::sync::Arc;

use anyhow::Result;
use console::style;

use drmr_sched::{BackendKind, SystemRunner, installed_backends};

/// Execute the backends command.
pub async fn execute() -> Result<()> {
    println!("{} Resource managers:\n", style("drmr").cyan().bold());

    let installed = installed_backends(Arc::new(SystemRunner::new())).await;
    for kind in BackendKind::ALL {
        let available = installed.contains(&kind);
        println!(
            "  {} {} {}",
            if available {
                style("●").green()
            } else {
                style("○").red()
            },
            style(kind.name()).bold(),
            style(format!("(.{} scripts)", kind.extension())).dim()
        );
    }

    if installed.len() != 1 {
        println!();
        println!(
            "  Set {} in ~/.drmrc to choose one.",
            style("\"resource_manager\"").yellow()
        );
    }

    Ok(())
}
