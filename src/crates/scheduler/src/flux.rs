//! Flux batch adapter: `flux batch`/`flux jobs`/`flux cancel`.

use crate::batch::BatchScriptAdapter;
use crate::error::Result;
use crate::script_adapter::LauncherOverride;
use std::collections::HashMap;
use std::path::Path;
use study::StudyStep;
use utils::State;

#[derive(Debug)]
pub struct FluxAdapter {
    batch: HashMap<String, String>,
}

impl FluxAdapter {
    pub fn new(bank: &str, queue: &str) -> Self {
        let mut batch = HashMap::new();
        batch.insert("bank".to_string(), bank.to_string());
        batch.insert("queue".to_string(), queue.to_string());
        FluxAdapter { batch }
    }
}

impl BatchScriptAdapter for FluxAdapter {
    fn key(&self) -> &'static str {
        "flux"
    }

    fn extension(&self) -> &str {
        "flux"
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
            lines.push(format!("#flux: -N {}", step.run.nodes));
        }
        if let Ok(Some(seconds)) = step.run.walltime_seconds() {
            lines.push(format!("#flux: -t {seconds}s"));
        }
        if let Some(queue) = self.batch.get("queue").filter(|q| !q.is_empty()) {
            lines.push(format!("#flux: -q {queue}"));
        }
        if let Some(bank) = self.batch.get("bank").filter(|b| !b.is_empty()) {
            lines.push(format!("#flux: --bank {bank}"));
        }
        if step.run.exclusive {
            lines.push("#flux: --exclusive".to_string());
        }
        Ok(lines.join("\n"))
    }

    fn parallel_command(
        &self,
        procs: u32,
        nodes: Option<u32>,
        overrides: &LauncherOverride,
    ) -> String {
        let mut args = vec!["flux".to_string(), "run".to_string(), "-n".to_string(), procs.to_string()];
        if let Some(nodes) = nodes {
            args.push("-N".to_string());
            args.push(nodes.to_string());
        }
        if let Some(cores) = overrides.cores_per_task {
            args.push("-c".to_string());
            args.push(cores.to_string());
        }
        if let Some(gpus) = overrides.gpus {
            args.push("-g".to_string());
            args.push(gpus.to_string());
        }
        if let Some(bind) = &overrides.bind {
            args.push(format!("-o cpu-affinity={bind}"));
        }
        args.extend(overrides.extra_args.iter().cloned());
        if overrides.variant.is_some() {
            tracing::debug!(variant = ?overrides.variant, "ignoring MPI variant hint for flux");
        }
        args.join(" ")
    }

    fn submit_command(&self, script_path: &Path, cwd: &Path) -> Vec<String> {
        vec![
            "flux".to_string(),
            "batch".to_string(),
            "--cwd".to_string(),
            cwd.display().to_string(),
            script_path.display().to_string(),
        ]
    }

    fn parse_submit_output(&self, stdout: &str) -> Option<String> {
        stdout.trim().lines().last().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn status_command(&self) -> Vec<String> {
        vec![
            "flux".to_string(),
            "jobs".to_string(),
            "-a".to_string(),
            "--no-header".to_string(),
        ]
    }

    fn parse_status_line(&self, line: &str) -> Option<(String, String)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return None;
        }
        Some((fields[0].to_string(), fields[1].to_string()))
    }

    fn map_state(&self, raw: &str) -> State {
        match raw {
            "RUN" | "R" => State::Running,
            "PD" | "SCHED" | "DEPEND" => State::Pending,
            "CD" | "COMPLETED" => State::Finished,
            "F" | "FAILED" => State::Failed,
            "CANCELLED" => State::Cancelled,
            "INACTIVE" => State::Initialized,
            _ => State::Unknown,
        }
    }

    fn cancel_command(&self, joblist: &[String]) -> Vec<String> {
        let mut cmd = vec!["flux".to_string(), "cancel".to_string()];
        cmd.extend(joblist.iter().cloned());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_states() {
        let adapter = FluxAdapter::new("bank", "queue");
        assert_eq!(adapter.map_state("RUN"), State::Running);
        assert_eq!(adapter.map_state("COMPLETED"), State::Finished);
    }

    #[test]
    fn parallel_command_includes_cores_and_gpus() {
        let adapter = FluxAdapter::new("bank", "queue");
        let overrides = LauncherOverride {
            cores_per_task: Some(4),
            gpus: Some(1),
            ..Default::default()
        };
        let cmd = adapter.parallel_command(2, None, &overrides);
        assert_eq!(cmd, "flux run -n 2 -c 4 -g 1");
    }

    #[test]
    fn header_sets_exclusive_when_requested() {
        use study::RunConfig;
        let adapter = FluxAdapter::new("bank", "queue");
        let step = StudyStep::new(
            "hello",
            "",
            RunConfig {
                exclusive: true,
                ..Default::default()
            },
        );
        assert!(adapter.render_header(&step).unwrap().contains("--exclusive"));
    }
}
