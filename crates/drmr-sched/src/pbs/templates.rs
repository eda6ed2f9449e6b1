//! PBS batch script templates.

use crate::backend::push_script_body;
use crate::directive::{JobDirective, control_directory_for};

/// Per-processor memory requested when a job asks for none.
const DEFAULT_PROCESSOR_MEMORY_MB: u64 = 4000;

/// Generate a PBS batch script.
///
/// `dependencies` and `mail_events` arrive already encoded; empty strings
/// leave their lines out.
pub fn generate_pbs_script(
    directive: &JobDirective,
    name: &str,
    working_directory: &std::path::Path,
    dependencies: &str,
    mail_events: &str,
    command: &str,
) -> String {
    let control_directory = control_directory_for(working_directory);
    let mut script = String::new();

    script.push_str("#!/bin/bash\n\n");
    script.push_str("####  PBS preamble\n\n");
    script.push_str("#PBS -V\n");
    script.push_str("#PBS -j oe\n");
    script.push_str(&format!("#PBS -o {}\n", control_directory.display()));

    if let Some(account) = &directive.account {
        script.push_str(&format!("# account={account}\n"));
        script.push_str(&format!("#PBS -A {account}\n"));
    }
    if let Some(email) = &directive.email {
        script.push_str(&format!("# email={email}\n"));
        script.push_str(&format!("#PBS -M {email}\n"));
    }
    if !mail_events.is_empty() {
        script.push_str(&format!("#PBS -m {mail_events}\n"));
    }

    script.push_str(&format!("#PBS -N {name}\n"));

    if !dependencies.is_empty() {
        script.push_str(&format!("#PBS -W depend={dependencies}\n"));
    }
    script.push_str(&format!("#PBS -d {}\n", working_directory.display()));

    let processors = directive.processors.unwrap_or(1);
    match directive.nodes {
        Some(nodes) => {
            let mut request = format!("#PBS -l nodes={nodes}:ppn={processors}");
            if let Some(properties) = &directive.node_properties {
                for property in properties.split(',').filter(|p| !p.is_empty()) {
                    request.push(':');
                    request.push_str(property.trim());
                }
            }
            script.push_str(&request);
            script.push('\n');
        }
        None => script.push_str(&format!("#PBS -l ncpus={processors}\n")),
    }

    match (&directive.memory, &directive.processor_memory) {
        (Some(memory), _) => script.push_str(&format!("#PBS -l mem={memory}mb\n")),
        (None, Some(per_processor)) => {
            script.push_str(&format!("#PBS -l pmem={per_processor}mb\n"));
        }
        (None, None) => {
            script.push_str(&format!("#PBS -l pmem={DEFAULT_PROCESSOR_MEMORY_MB}mb\n"));
        }
    }

    if let Some(time_limit) = &directive.time_limit {
        script.push_str(&format!("#PBS -l walltime={time_limit}\n"));
    }
    if let Some(destination) = &directive.destination {
        script.push_str(&format!("#PBS -q {destination}\n"));
    }
    if let Some(array) = &directive.array_control {
        script.push_str(&format!("#PBS -t {}\n", array.range_spec()));
    }

    push_script_body(&mut script, "PBS", directive, command);
    script
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::directive::ArrayControl;

    fn directive() -> JobDirective {
        let mut directive = JobDirective::default();
        directive.set("job_name", "align").unwrap();
        directive.set("working_directory", "/data/run").unwrap();
        directive
    }

    #[test]
    fn test_minimal_script() {
        let script = generate_pbs_script(
            &directive(),
            "align",
            Path::new("/data/run"),
            "",
            "",
            "bwa mem ref.fa a.fq",
        );
        let expected = "#!/bin/bash

####  PBS preamble

#PBS -V
#PBS -j oe
#PBS -o /data/run/.drmr
#PBS -N align
#PBS -d /data/run
#PBS -l ncpus=1
#PBS -l pmem=4000mb


####  End PBS preamble



####  Commands

bwa mem ref.fa a.fq
";
        assert_eq!(script, expected);
    }

    #[test]
    fn test_full_preamble() {
        let mut directive = directive();
        directive.set("account", "parkerlab").unwrap();
        directive.set("email", "me@example.org").unwrap();
        directive.set("nodes", "2").unwrap();
        directive.set("processors", "8").unwrap();
        directive.set("node_properties", "bigmem,ssd").unwrap();
        directive.set("memory", "16g").unwrap();
        directive.set("time_limit", "1d").unwrap();
        directive.set("destination", "batch").unwrap();
        directive.array_control = Some(ArrayControl::one_based(4, Some(2)));
        directive.environment_setup.push("module load bwa".into());
        directive.notes = Some("# aligned per lane".into());

        let script = generate_pbs_script(
            &directive,
            "align",
            Path::new("/data/run"),
            "afterok:1.server",
            "ae",
            "true",
        );

        for line in [
            "# account=parkerlab\n#PBS -A parkerlab\n",
            "#PBS -M me@example.org\n#PBS -m ae\n#PBS -N align\n",
            "#PBS -W depend=afterok:1.server\n",
            "#PBS -l nodes=2:ppn=8:bigmem:ssd\n",
            "#PBS -l mem=16000mb\n",
            "#PBS -l walltime=24:00:00\n",
            "#PBS -q batch\n",
            "#PBS -t 1-4%2\n",
            "####  Notes\n# aligned per lane\n",
            "####  Environment setup\nmodule load bwa\n",
        ] {
            assert!(script.contains(line), "missing {line:?} in\n{script}");
        }
        assert!(!script.contains("pmem"));
    }

    #[test]
    fn test_zero_processors_rendered_verbatim() {
        let mut directive = directive();
        directive.set("processors", "0").unwrap();
        directive.set("processor_memory", "2g").unwrap();
        let script =
            generate_pbs_script(&directive, "align", Path::new("/data/run"), "", "", "true");
        assert!(script.contains("#PBS -l ncpus=0\n"));
        assert!(script.contains("#PBS -l pmem=2000mb\n"));
    }
}
