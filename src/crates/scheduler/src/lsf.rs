//! LSF batch adapter: `bsub`/`bjobs`/`bkill`.

use crate::batch::BatchScriptAdapter;
use crate::error::Result;
use crate::script_adapter::LauncherOverride;
use std::collections::HashMap;
use std::path::Path;
use study::StudyStep;
use utils::State;

#[derive(Debug)]
pub struct LsfAdapter {
    batch: HashMap<String, String>,
}

impl LsfAdapter {
    pub fn new(host: &str, bank: &str, queue: &str) -> Self {
        let mut batch = HashMap::new();
        batch.insert("host".to_string(), host.to_string());
        batch.insert("bank".to_string(), bank.to_string());
        batch.insert("queue".to_string(), queue.to_string());
        LsfAdapter { batch }
    }
}

impl BatchScriptAdapter for LsfAdapter {
    fn key(&self) -> &'static str {
        "lsf"
    }

    fn extension(&self) -> &str {
        "lsf"
    }

    fn batch_parameters(&self) -> &HashMap<String, String> {
        &self.batch
    }

    fn batch_parameters_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.batch
    }

    fn render_header(&self, step: &StudyStep) -> Result<String> {
        let job_name = step.name.replace(' ', "_");
        let mut lines = Vec::new();
        if !step.run.nodes.is_empty() {
            lines.push(format!("#BSUB -nnodes {}", step.run.nodes));
        }
        if let Some(queue) = self.batch.get("queue").filter(|q| !q.is_empty()) {
            lines.push(format!("#BSUB -q {queue}"));
        }
        if let Some(bank) = self.batch.get("bank").filter(|b| !b.is_empty()) {
            lines.push(format!("#BSUB -G {bank}"));
        }
        if let Ok(Some(seconds)) = step.run.walltime_seconds() {
            let minutes = (seconds + 59) / 60;
            lines.push(format!("#BSUB -W {minutes}"));
        }
        if step.run.exclusive {
            lines.push("#BSUB -x".to_string());
        }
        lines.push(format!("#BSUB -J {job_name}"));
        lines.push(format!("#BSUB -o {job_name}.%J.out"));
        lines.push(format!("#BSUB -e {job_name}.%J.err"));
        Ok(lines.join("\n"))
    }

    fn parallel_command(
        &self,
        procs: u32,
        nodes: Option<u32>,
        overrides: &LauncherOverride,
    ) -> String {
        let rs_per_node = nodes.filter(|n| *n > 0).unwrap_or(1);
        let mut args = vec![
            "jsrun".to_string(),
            "--nrs".to_string(),
            procs.to_string(),
            "-r".to_string(),
            rs_per_node.to_string(),
        ];
        if let Some(cores) = overrides.cores_per_task {
            args.push("-c".to_string());
            args.push(cores.to_string());
        }
        if let Some(gpus) = overrides.gpus {
            args.push("-g".to_string());
            args.push(gpus.to_string());
        }
        if let Some(bind) = &overrides.bind {
            args.push("-b".to_string());
            args.push(bind.clone());
        }
        args.extend(overrides.extra_args.iter().cloned());
        if overrides.variant.is_some() {
            tracing::debug!(variant = ?overrides.variant, "ignoring MPI variant hint for lsf");
        }
        args.join(" ")
    }

    fn submit_command(&self, script_path: &Path, cwd: &Path) -> Vec<String> {
        vec![
            "bsub".to_string(),
            "-cwd".to_string(),
            cwd.display().to_string(),
            "<".to_string(),
            script_path.display().to_string(),
        ]
    }

    fn parse_submit_output(&self, stdout: &str) -> Option<String> {
        let start = stdout.find('<')?;
        let rest = &stdout[start + 1..];
        let end = rest.find('>')?;
        Some(rest[..end].to_string())
    }

    fn status_command(&self) -> Vec<String> {
        vec!["bjobs".to_string(), "-a".to_string()]
    }

    fn parse_status_line(&self, line: &str) -> Option<(String, String)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[0] == "JOBID" {
            return None;
        }
        Some((fields[0].to_string(), fields[2].to_string()))
    }

    fn map_state(&self, raw: &str) -> State {
        match raw {
            "RUN" => State::Running,
            "PEND" => State::Pending,
            "DONE" => State::Finished,
            "EXIT" => State::Failed,
            "USUSP" | "SSUSP" | "PSUSP" => State::Waiting,
            _ => State::Unknown,
        }
    }

    fn cancel_command(&self, joblist: &[String]) -> Vec<String> {
        let mut cmd = vec!["bkill".to_string()];
        cmd.extend(joblist.iter().cloned());
        cmd
    }
}
