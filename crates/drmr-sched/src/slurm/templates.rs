//! SLURM batch script templates.

use std::path::Path;

use crate::backend::push_script_body;
use crate::directive::{JobDirective, control_directory_for};

const DEFAULT_PROCESSOR_MEMORY_MB: u64 = 4000;

/// Generate a SLURM batch script.
///
/// `dependencies` and `mail_events` arrive already encoded; empty strings
/// leave their lines out.
pub fn generate_batch_script(
    directive: &JobDirective,
    name: &str,
    working_directory: &Path,
    dependencies: &str,
    mail_events: &str,
    command: &str,
) -> String {
    let control_directory = control_directory_for(working_directory);
    let mut script = String::new();

    script.push_str("#!/bin/bash\n\n");
    script.push_str("####  Slurm preamble\n\n");
    script.push_str("#SBATCH --export=ALL\n");
    script.push_str(&format!("#SBATCH --job-name={name}\n"));

    if let Some(nodes) = directive.nodes {
        script.push_str(&format!("#SBATCH --nodes={nodes}\n"));
    }
    if let Some(properties) = &directive.node_properties {
        let constraint: Vec<&str> = properties
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        script.push_str(&format!("#SBATCH --constraint=\"{}\"\n", constraint.join("&")));
    }

    script.push_str(&format!(
        "#SBATCH --cpus-per-task={}\n",
        directive.processors.unwrap_or(1)
    ));

    match (&directive.memory, &directive.processor_memory) {
        (Some(memory), _) => script.push_str(&format!("#SBATCH --mem={memory}\n")),
        (None, Some(per_processor)) => {
            script.push_str(&format!("#SBATCH --mem-per-cpu={per_processor}\n"));
        }
        (None, None) => {
            script.push_str(&format!(
                "#SBATCH --mem-per-cpu={DEFAULT_PROCESSOR_MEMORY_MB}\n"
            ));
        }
    }

    if let Some(time_limit) = &directive.time_limit {
        script.push_str(&format!("#SBATCH --time={time_limit}\n"));
    }

    let output_pattern = if directive.array_control.is_some() {
        "%A_%a_%j"
    } else {
        "%j"
    };
    script.push_str(&format!(
        "#SBATCH --output \"{}/{name}_{output_pattern}.out\"\n",
        control_directory.display()
    ));

    if let Some(account) = &directive.account {
        script.push_str(&format!("#SBATCH --account={account}\n"));
    }
    if let Some(destination) = &directive.destination {
        script.push_str(&format!("#SBATCH --partition={destination}\n"));
    }
    if let Some(email) = &directive.email {
        script.push_str(&format!("#SBATCH --mail-user={email}\n"));
    }
    if !mail_events.is_empty() {
        script.push_str(&format!("#SBATCH --mail-type={mail_events}\n"));
    }
    if !dependencies.is_empty() {
        script.push_str(&format!("#SBATCH --dependency={dependencies}\n"));
    }
    script.push_str(&format!(
        "#SBATCH --chdir={}\n",
        working_directory.display()
    ));
    if let Some(array) = &directive.array_control {
        script.push_str(&format!("#SBATCH --array {}\n", array.range_spec()));
    }

    push_script_body(&mut script, "Slurm", directive, command);
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::ArrayControl;

    #[test]
    fn test_minimal_script() {
        let script = generate_batch_script(
            &JobDirective::default(),
            "run.1",
            Path::new("/scratch/run"),
            "",
            "",
            "samtools index a.bam",
        );
        let expected = "#!/bin/bash

####  Slurm preamble

#SBATCH --export=ALL
#SBATCH --job-name=run.1
#SBATCH --cpus-per-task=1
#SBATCH --mem-per-cpu=4000
#SBATCH --output \"/scratch/run/.drmr/run.1_%j.out\"
#SBATCH --chdir=/scratch/run


####  End Slurm preamble



####  Commands

samtools index a.bam
";
        assert_eq!(script, expected);
    }

    #[test]
    fn test_array_job_preamble() {
        let mut directive = JobDirective::default();
        directive.set("nodes", "1").unwrap();
        directive.set("node_properties", "haswell,ib").unwrap();
        directive.set("memory", "8g").unwrap();
        directive.set("time_limit", "90m").unwrap();
        directive.set("account", "lab").unwrap();
        directive.set("destination", "standard").unwrap();
        directive.set("email", "me@example.org").unwrap();
        directive.array_control = Some(ArrayControl::one_based(3, None));
        directive.raw_preamble = Some("#SBATCH --exclusive".into());

        let script = generate_batch_script(
            &directive,
            "align",
            Path::new("/scratch/run"),
            "afterok:10:11",
            "END,FAIL",
            "true",
        );

        for line in [
            "#SBATCH --nodes=1\n#SBATCH --constraint=\"haswell&ib\"\n",
            "#SBATCH --mem=8000\n#SBATCH --time=01:30:00\n",
            "#SBATCH --output \"/scratch/run/.drmr/align_%A_%a_%j.out\"\n",
            "#SBATCH --account=lab\n#SBATCH --partition=standard\n",
            "#SBATCH --mail-user=me@example.org\n#SBATCH --mail-type=END,FAIL\n",
            "#SBATCH --dependency=afterok:10:11\n",
            "#SBATCH --array 1-3\n#SBATCH --exclusive\n\n\n####  End Slurm preamble\n",
        ] {
            assert!(script.contains(line), "missing {line:?} in\n{script}");
        }
        assert!(!script.contains("--mem-per-cpu"));
    }
}
