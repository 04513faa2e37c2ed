//! The `ScriptAdapter` / `SchedulerScriptAdapter` contract every backend
//! (local pool or batch scheduler) implements. Adapters only ever see a
//! `StudyStep` and a workspace path; the execution graph manages state.

use crate::error::{Result, SchedulerError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use study::StudyStep;
use utils::{CancelCode, JobStatusCode, State, SubmissionCode};

static LAUNCHER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\(LAUNCHER(\[([^\]]*)\])?\)").unwrap());

/// Constructs scripts for a `StudyStep` and knows how to drive its backend.
pub trait ScriptAdapter: std::fmt::Debug {
    /// Query status for a batch of job identifiers.
    fn check_jobs(&self, joblist: &[String]) -> Result<(JobStatusCode, HashMap<String, State>)>;

    /// Cancel the given job identifiers.
    fn cancel_jobs(&self, joblist: &[String]) -> Result<CancelCode>;

    fn write_script_impl(
        &self,
        ws_path: &Path,
        step: &StudyStep,
    ) -> Result<(bool, PathBuf, Option<PathBuf>)>;

    /// Submit a written script. `cwd` is the step's workspace.
    fn submit(
        &self,
        step: &StudyStep,
        path: &Path,
        cwd: &Path,
        env: Option<&HashMap<String, String>>,
    ) -> Result<(SubmissionCode, String)>;

    /// Write the step's script(s) and mark them executable.
    fn write_script(
        &self,
        ws_path: &Path,
        step: &StudyStep,
    ) -> Result<(bool, PathBuf, Option<PathBuf>)> {
        let (to_be_scheduled, script_path, restart_path) = self.write_script_impl(ws_path, step)?;
        mark_executable(&script_path)?;
        if let Some(ref restart) = restart_path {
            mark_executable(restart)?;
        }
        Ok((to_be_scheduled, script_path, restart_path))
    }
}

fn mark_executable(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)?;
    let mut perms = metadata.permissions();
    perms.set_mode(perms.mode() | 0o100);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

/// Parsed override from an inline `$(LAUNCHER[...])` tag: `<N>n` overrides
/// node count, `<M>t` overrides task count, `<K>c` overrides cores per task,
/// `<G>g` overrides gpu count, `bind=<spec>` sets a binding policy, and
/// anything else is passed through — the first such token as an MPI-variant
/// hint, any further ones verbatim as extra launcher arguments.
#[derive(Debug, Default, Clone)]
pub struct LauncherOverride {
    pub nodes: Option<u32>,
    pub procs: Option<u32>,
    pub cores_per_task: Option<u32>,
    pub gpus: Option<u32>,
    pub bind: Option<String>,
    pub variant: Option<String>,
    pub extra_args: Vec<String>,
}

fn parse_overrides(raw: &str) -> LauncherOverride {
    let mut out = LauncherOverride::default();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Some(digits) = token.strip_suffix('n') {
            if let Ok(n) = digits.parse() {
                out.nodes = Some(n);
                continue;
            }
        }
        if let Some(digits) = token.strip_suffix('t') {
            if let Ok(n) = digits.parse() {
                out.procs = Some(n);
                continue;
            }
        }
        if let Some(digits) = token.strip_suffix('c') {
            if let Ok(n) = digits.parse() {
                out.cores_per_task = Some(n);
                continue;
            }
        }
        if let Some(digits) = token.strip_suffix('g') {
            if let Ok(n) = digits.parse() {
                out.gpus = Some(n);
                continue;
            }
        }
        if let Some(spec) = token.strip_prefix("bind=") {
            out.bind = Some(spec.to_string());
            continue;
        }
        if out.variant.is_none() {
            out.variant = Some(token.to_string());
        } else {
            out.extra_args.push(token.to_string());
        }
    }
    out
}

/// A batch-scheduling adapter layered over `ScriptAdapter`: it knows how to
/// render a header and a parallel launcher prefix from a step's resource
/// request, and stores the batch-wide defaults steps fall back to.
pub trait SchedulerScriptAdapter: ScriptAdapter {
    fn batch_parameters(&self) -> &HashMap<String, String>;

    fn add_batch_parameter(&mut self, name: impl Into<String>, value: impl Into<String>);

    /// Render the header block placed at the top of a generated script.
    fn get_header(&self, step: &StudyStep) -> Result<String>;

    /// Produce the backend's parallel launcher prefix for a resource
    /// request. `nodes`/`procs` come either from the step or from an inline
    /// `$(LAUNCHER[...])` override.
    fn get_parallelize_command(
        &self,
        procs: u32,
        nodes: Option<u32>,
        overrides: &LauncherOverride,
    ) -> String;

    /// Replace every `$(LAUNCHER)` / `$(LAUNCHER[...])` occurrence in `cmd`
    /// with this adapter's parallel command for the step's resources.
    fn substitute_launcher(&self, cmd: &str, step: &StudyStep) -> Result<String> {
        if !LAUNCHER_TOKEN.is_match(cmd) {
            return Ok(cmd.to_string());
        }
        let run = &step.run;
        let base_procs: u32 = run.procs.trim().parse().unwrap_or(0);
        let base_nodes: Option<u32> = run.nodes.trim().parse().ok();
        let base_cores_per_task: Option<u32> = run.cores_per_task.trim().parse().ok();
        let base_gpus: Option<u32> = run.gpus.trim().parse().ok();

        let replaced = LAUNCHER_TOKEN.replace_all(cmd, |caps: &regex::Captures| {
            let mut overrides = caps
                .get(2)
                .map(|m| parse_overrides(m.as_str()))
                .unwrap_or_default();
            let procs = overrides.procs.unwrap_or(base_procs);
            let nodes = overrides.nodes.or(base_nodes);
            overrides.cores_per_task = overrides.cores_per_task.or(base_cores_per_task);
            overrides.gpus = overrides.gpus.or(base_gpus);
            self.get_parallelize_command(procs, nodes, &overrides)
        });
        Ok(replaced.into_owned())
    }

    /// Decide whether a step needs scheduling (it requested nodes/procs)
    /// and produce the launcher-substituted command and restart command.
    fn get_scheduler_command(&self, step: &StudyStep) -> Result<(bool, String, String)> {
        if step.run.cmd.is_empty() {
            return Err(SchedulerError::MalformedStep(step.name.clone()));
        }

        let to_be_scheduled = !step.run.nodes.trim().is_empty() || !step.run.procs.trim().is_empty();
        let cmd = self.substitute_launcher(&step.run.cmd, step)?;
        let restart = if step.run.restart.is_empty() {
            String::new()
        } else {
            self.substitute_launcher(&step.run.restart, step)?
        };
        Ok((to_be_scheduled, cmd, restart))
    }
}
