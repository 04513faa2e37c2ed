//! Slurm batch adapter: `sbatch`/`squeue`/`scancel`.

use crate::batch::BatchScriptAdapter;
use crate::error::Result;
use crate::script_adapter::LauncherOverride;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use study::StudyStep;
use utils::State;

static JOBID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

#[derive(Debug)]
pub struct SlurmAdapter {
    batch: HashMap<String, String>,
}

impl SlurmAdapter {
    pub fn new(host: &str, bank: &str, queue: &str, reservation: &str) -> Self {
        let mut batch = HashMap::new();
        batch.insert("host".to_string(), host.to_string());
        batch.insert("bank".to_string(), bank.to_string());
        batch.insert("queue".to_string(), queue.to_string());
        batch.insert("reservation".to_string(), reservation.to_string());
        SlurmAdapter { batch }
    }
}

impl BatchScriptAdapter for SlurmAdapter {
    fn key(&self) -> &'static str {
        "slurm"
    }

    fn extension(&self) -> &str {
        "slurm"
    }

    fn batch_parameters(&self) -> &HashMap<String, String> {
        &self.batch
    }

    fn batch_parameters_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.batch
    }

    fn render_header(&self, step: &StudyStep) -> Result<String> {
        let mut lines = Vec::new();
        if !step.run.nodes.is_empty() {
            lines.push(format!("#SBATCH -N {}", step.run.nodes));
        }
        if let Some(queue) = self.batch.get("queue").filter(|q| !q.is_empty()) {
            lines.push(format!("#SBATCH -p {queue}"));
        }
        let reservation = self.batch.get("reservation").filter(|r| !r.is_empty());
        if let Some(reservation) = reservation {
            lines.push(format!("#SBATCH --reservation {reservation}"));
        } else if let Some(bank) = self.batch.get("bank").filter(|b| !b.is_empty()) {
            lines.push(format!("#SBATCH -A {bank}"));
        }
        if let Ok(Some(seconds)) = step.run.walltime_seconds() {
            lines.push(format!("#SBATCH -t {seconds}"));
        }
        if step.run.exclusive {
            lines.push("#SBATCH --exclusive".to_string());
        }
        lines.push(format!("#SBATCH -J {}", step.name.replace(' ', "_")));
        lines.push(format!(
            "#SBATCH --comment \"{}\"",
            step.description.replace('\n', " ")
        ));
        Ok(lines.join("\n"))
    }

    fn parallel_command(
        &self,
        procs: u32,
        nodes: Option<u32>,
        overrides: &LauncherOverride,
    ) -> String {
        let mut args = vec!["srun".to_string(), "-n".to_string(), procs.to_string()];
        if let Some(nodes) = nodes {
            args.push("-N".to_string());
            args.push(nodes.to_string());
        }
        if let Some(cores) = overrides.cores_per_task {
            args.push("-c".to_string());
            args.push(cores.to_string());
        }
        if let Some(gpus) = overrides.gpus {
            args.push(format!("--gpus={gpus}"));
        }
        if let Some(bind) = &overrides.bind {
            args.push(format!("--cpu-bind={bind}"));
        }
        args.extend(overrides.extra_args.iter().cloned());
        if overrides.variant.is_some() {
            tracing::debug!(variant = ?overrides.variant, "ignoring MPI variant hint for slurm");
        }
        args.join(" ")
    }

    fn submit_command(&self, script_path: &Path, cwd: &Path) -> Vec<String> {
        let mut cmd = vec!["sbatch".to_string()];
        if let Some(reservation) = self.batch.get("reservation").filter(|r| !r.is_empty()) {
            cmd.push("--reservation".to_string());
            cmd.push(reservation.clone());
        }
        cmd.push(script_path.display().to_string());
        cmd.push("-D".to_string());
        cmd.push(cwd.display().to_string());
        cmd
    }

    fn parse_submit_output(&self, stdout: &str) -> Option<String> {
        JOBID_RE.find(stdout).map(|m| m.as_str().to_string())
    }

    fn status_command(&self) -> Vec<String> {
        vec![
            "squeue".to_string(),
            "-u".to_string(),
            "$USER".to_string(),
            "-t".to_string(),
            "all".to_string(),
        ]
    }

    fn parse_status_line(&self, line: &str) -> Option<(String, String)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return None;
        }
        Some((fields[0].to_string(), fields[4].to_string()))
    }

    fn map_state(&self, raw: &str) -> State {
        match raw {
            "R" => State::Running,
            "PD" => State::Pending,
            "CG" => State::Finishing,
            "CD" => State::Finished,
            "NF" => State::HwFailure,
            "TO" => State::TimedOut,
            "ST" | "F" => State::Failed,
            "CA" => State::Cancelled,
            _ => State::Unknown,
        }
    }

    fn cancel_command(&self, joblist: &[String]) -> Vec<String> {
        let mut cmd = vec!["scancel".to_string(), "--quiet".to_string()];
        cmd.extend(joblist.iter().cloned());
        cmd
    }
}
