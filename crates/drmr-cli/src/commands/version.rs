//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - shell pipelines on PBS and SLURM",
        style("drmr").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  drmr-sched  Script parsing, job graphs and scheduler backends");
    println!("  drmr-cli    Command-line interface");
    println!();
    println!(
        "Repository: {}",
        style("https://github.com/ParkerLab/drmr").underlined()
    );
    println!("License:    {}", style("GPL-3.0-or-later").dim());
}
