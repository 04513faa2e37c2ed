//! `BatchScriptAdapter`: the shared machinery every batch-queue backend
//! (Slurm, LSF, Flux) reuses. Concrete adapters only supply the handful of
//! backend-specific bits (header format, launcher flags, status parsing);
//! everything else — script writing, submission, polling, cancellation — is
//! implemented once here via a blanket `ScriptAdapter`/`SchedulerScriptAdapter`
//! impl.

use crate::error::{Result, SchedulerError};
use crate::script_adapter::{LauncherOverride, ScriptAdapter, SchedulerScriptAdapter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use study::StudyStep;
use utils::{CancelCode, JobStatusCode, State, SubmissionCode};

pub trait BatchScriptAdapter: std::fmt::Debug {
    fn key(&self) -> &'static str;
    fn extension(&self) -> &str;
    fn shebang(&self) -> &str {
        "#!/bin/bash"
    }
    fn batch_parameters(&self) -> &HashMap<String, String>;
    fn batch_parameters_mut(&mut self) -> &mut HashMap<String, String>;

    /// The header block for this step, not including the shebang line.
    fn render_header(&self, step: &StudyStep) -> Result<String>;

    fn parallel_command(
        &self,
        procs: u32,
        nodes: Option<u32>,
        overrides: &LauncherOverride,
    ) -> String;

    /// The submission command line (e.g. `sbatch <path> -D <cwd>`).
    fn submit_command(&self, script_path: &Path, cwd: &Path) -> Vec<String>;

    /// Pull the backend job id out of a successful submission's stdout.
    fn parse_submit_output(&self, stdout: &str) -> Option<String>;

    /// The status-query command line (e.g. `squeue -u $USER -t all`).
    fn status_command(&self) -> Vec<String>;

    /// Parse one line of status output into `(jobid, raw_state)`.
    fn parse_status_line(&self, line: &str) -> Option<(String, String)>;

    /// Map a backend-specific state string to the uniform `State` enum.
    fn map_state(&self, raw: &str) -> State;

    /// The cancellation command line for a batch of job ids.
    fn cancel_command(&self, joblist: &[String]) -> Vec<String>;
}

fn run(cmd: &[String]) -> Result<std::process::Output> {
    if cmd.is_empty() {
        return Err(SchedulerError::SubmissionFailed {
            step: String::new(),
            detail: "empty command".to_string(),
        });
    }
    Command::new(&cmd[0])
        .args(&cmd[1..])
        .output()
        .map_err(SchedulerError::Io)
}

impl<T: BatchScriptAdapter> ScriptAdapter for T {
    fn check_jobs(&self, joblist: &[String]) -> Result<(JobStatusCode, HashMap<String, State>)> {
        let mut status: HashMap<String, State> = joblist
            .iter()
            .map(|j| (j.clone(), State::Unknown))
            .collect();

        let output = match run(&self.status_command()) {
            Ok(out) => out,
            Err(_) => return Ok((JobStatusCode::Error, status)),
        };

        if !output.status.success() {
            if output.status.code() == Some(1) {
                tracing::warn!("no jobs executing; returning empty status map");
                return Ok((JobStatusCode::NoJobs, status));
            }
            return Ok((JobStatusCode::Error, status));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        for line in text.lines() {
            if let Some((jobid, raw_state)) = self.parse_status_line(line) {
                if status.contains_key(&jobid) {
                    status.insert(jobid, self.map_state(&raw_state));
                }
            }
        }
        Ok((JobStatusCode::Ok, status))
    }

    fn cancel_jobs(&self, joblist: &[String]) -> Result<CancelCode> {
        if joblist.is_empty() {
            return Ok(CancelCode::Ok);
        }
        let output = run(&self.cancel_command(joblist))?;
        if output.status.success() {
            Ok(CancelCode::Ok)
        } else {
            Ok(CancelCode::Error)
        }
    }

    fn write_script_impl(
        &self,
        ws_path: &Path,
        step: &StudyStep,
    ) -> Result<(bool, PathBuf, Option<PathBuf>)> {
        let (to_be_scheduled, cmd, restart) = self.get_scheduler_command(step)?;

        let script_path = ws_path.join(format!("{}.{}.sh", step.name, self.extension()));
        let body = if to_be_scheduled {
            format!("{}\n{}\n\n{}\n", self.shebang(), self.render_header(step)?, cmd)
        } else {
            format!("{}\n\n{}\n", self.shebang(), cmd)
        };
        std::fs::write(&script_path, body)?;

        let restart_path = if restart.is_empty() {
            None
        } else {
            let path = ws_path.join(format!("{}.restart.{}.sh", step.name, self.extension()));
            let body = if to_be_scheduled {
                format!(
                    "{}\n{}\n\n{}\n",
                    self.shebang(),
                    self.render_header(step)?,
                    restart
                )
            } else {
                format!("{}\n\n{}\n", self.shebang(), restart)
            };
            std::fs::write(&path, body)?;
            Some(path)
        };

        Ok((to_be_scheduled, script_path, restart_path))
    }

    fn submit(
        &self,
        step: &StudyStep,
        path: &Path,
        cwd: &Path,
        _env: Option<&HashMap<String, String>>,
    ) -> Result<(SubmissionCode, String)> {
        let command_line = self.submit_command(path, cwd);
        let output = Command::new(&command_line[0])
            .args(&command_line[1..])
            .current_dir(cwd)
            .output()
            .map_err(|e| SchedulerError::SubmissionFailed {
                step: step.name.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            tracing::warn!(step = %step.name, "submission returned an error");
            return Ok((SubmissionCode::Error, "-1".to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match self.parse_submit_output(&stdout) {
            Some(jobid) => Ok((SubmissionCode::Ok, jobid)),
            None => Ok((SubmissionCode::Error, "-1".to_string())),
        }
    }
}

impl<T: BatchScriptAdapter> SchedulerScriptAdapter for T {
    fn batch_parameters(&self) -> &HashMap<String, String> {
        BatchScriptAdapter::batch_parameters(self)
    }

    fn add_batch_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.batch_parameters_mut().insert(name.into(), value.into());
    }

    fn get_header(&self, step: &StudyStep) -> Result<String> {
        self.render_header(step)
    }

    fn get_parallelize_command(
        &self,
        procs: u32,
        nodes: Option<u32>,
        overrides: &LauncherOverride,
    ) -> String {
        self.parallel_command(procs, nodes, overrides)
    }
}
