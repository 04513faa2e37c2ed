//! `LocalPoolAdapter`: runs steps in-process as local child processes rather
//! than submitting to an external scheduler. Each submitted script becomes
//! its own process group so a cancellation can take down everything the
//! script itself spawned, not just the shell wrapper.

use crate::error::Result;
use crate::script_adapter::{LauncherOverride, ScriptAdapter, SchedulerScriptAdapter};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use study::StudyStep;
use utils::{CancelCode, JobStatusCode, State, SubmissionCode};

/// How long `cancel_jobs` waits for a SIGTERM'd process group to exit on its
/// own before escalating to SIGKILL.
const CANCEL_GRACE_PERIOD: Duration = Duration::from_millis(500);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Worker {
    child: Child,
    state: State,
    slots: u32,
}

/// A bounded pool of local worker slots. Each running step reserves
/// `max(1, step.run.procs)` slots; submission that would exceed
/// `max_workers` fails immediately rather than queuing, mirroring the
/// underlying executor's submit-or-raise behavior.
#[derive(Debug)]
pub struct LocalPoolAdapter {
    batch: HashMap<String, String>,
    max_workers: usize,
    shell: String,
    extension: String,
    workers: Mutex<HashMap<String, Worker>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("state", &self.state).field("slots", &self.slots).finish()
    }
}

impl LocalPoolAdapter {
    pub fn new(num_workers: usize) -> Self {
        let mut batch = HashMap::new();
        batch.insert("max_workers".to_string(), num_workers.to_string());
        LocalPoolAdapter {
            batch,
            max_workers: num_workers.max(1),
            shell: "/bin/bash".to_string(),
            extension: "lp.sh".to_string(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn occupied_slots(&self) -> u32 {
        self.workers.lock().expect("local pool mutex poisoned").values().map(|w| w.slots).sum()
    }
}

impl ScriptAdapter for LocalPoolAdapter {
    fn check_jobs(&self, joblist: &[String]) -> Result<(JobStatusCode, HashMap<String, State>)> {
        if joblist.is_empty() {
            return Ok((JobStatusCode::Ok, HashMap::new()));
        }

        let mut status: HashMap<String, State> = joblist
            .iter()
            .map(|j| (j.clone(), State::Unknown))
            .collect();

        let mut workers = self.workers.lock().expect("local pool mutex poisoned");
        for jobid in joblist {
            let Some(worker) = workers.get_mut(jobid) else {
                continue;
            };
            match worker.child.try_wait() {
                Ok(Some(exit)) => {
                    worker.state = if exit.success() {
                        State::Finished
                    } else {
                        State::Failed
                    };
                }
                Ok(None) => worker.state = State::Running,
                Err(_) => worker.state = State::Unknown,
            }
            status.insert(jobid.clone(), worker.state);
        }
        workers.retain(|_, w| !w.state.is_terminal());

        Ok((JobStatusCode::Ok, status))
    }

    fn cancel_jobs(&self, joblist: &[String]) -> Result<CancelCode> {
        if joblist.is_empty() {
            return Ok(CancelCode::Ok);
        }

        let mut any_failed = false;
        let mut pids: Vec<(String, i32)> = Vec::with_capacity(joblist.len());
        {
            let mut workers = self.workers.lock().expect("local pool mutex poisoned");
            for jobid in joblist {
                let pid: i32 = match jobid.parse() {
                    Ok(p) => p,
                    Err(_) => {
                        any_failed = true;
                        continue;
                    }
                };
                if killpg(Pid::from_raw(pid), Signal::SIGTERM).is_err() {
                    any_failed = true;
                }
                if let Some(worker) = workers.get_mut(jobid) {
                    worker.state = State::Cancelled;
                }
                pids.push((jobid.clone(), pid));
            }
        }

        // Give each process group a bounded chance to exit on SIGTERM before
        // escalating to SIGKILL.
        let deadline = Instant::now() + CANCEL_GRACE_PERIOD;
        loop {
            let all_exited = {
                let mut workers = self.workers.lock().expect("local pool mutex poisoned");
                pids.iter().all(|(jobid, _)| {
                    workers
                        .get_mut(jobid)
                        .map(|w| matches!(w.child.try_wait(), Ok(Some(_))))
                        .unwrap_or(true)
                })
            };
            if all_exited || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(CANCEL_POLL_INTERVAL);
        }

        let mut workers = self.workers.lock().expect("local pool mutex poisoned");
        for (jobid, pid) in &pids {
            let Some(worker) = workers.get_mut(jobid) else { continue };
            if matches!(worker.child.try_wait(), Ok(Some(_))) {
                continue;
            }
            if killpg(Pid::from_raw(*pid), Signal::SIGKILL).is_err() {
                any_failed = true;
            }
            let _ = worker.child.kill();
        }

        Ok(if any_failed { CancelCode::Error } else { CancelCode::Ok })
    }

    fn write_script_impl(
        &self,
        ws_path: &Path,
        step: &StudyStep,
    ) -> Result<(bool, PathBuf, Option<PathBuf>)> {
        let to_be_scheduled = true;
        let cmd = self.substitute_launcher(&step.run.cmd, step)?;

        let script_path = ws_path.join(format!("{}.{}", step.name, self.extension));
        std::fs::write(&script_path, format!("#!{}\n{}\n{}", self.shell, self.get_header(step)?, cmd))?;

        let restart_path = if step.run.restart.is_empty() {
            None
        } else {
            let restart = self.substitute_launcher(&step.run.restart, step)?;
            let path = ws_path.join(format!("{}.restart.{}", step.name, self.extension));
            std::fs::write(&path, format!("#!{}\n{}\n{}", self.shell, self.get_header(step)?, restart))?;
            Some(path)
        };

        Ok((to_be_scheduled, script_path, restart_path))
    }

    fn submit(
        &self,
        step: &StudyStep,
        path: &Path,
        cwd: &Path,
        env: Option<&HashMap<String, String>>,
    ) -> Result<(SubmissionCode, String)> {
        let slots = step.run.slots();
        if self.occupied_slots() + slots > self.max_workers as u32 {
            tracing::debug!(step = %step.name, slots, "local pool at capacity");
            return Ok((SubmissionCode::Error, "-1".to_string()));
        }

        let mut command = Command::new(path);
        command.current_dir(cwd).process_group(0);
        if let Some(env) = env {
            command.envs(env);
        }

        match command.spawn() {
            Ok(child) => {
                let pid = child.id().to_string();
                self.workers.lock().expect("local pool mutex poisoned").insert(
                    pid.clone(),
                    Worker {
                        child,
                        state: State::Running,
                        slots,
                    },
                );
                Ok((SubmissionCode::Ok, pid))
            }
            Err(e) => {
                tracing::error!(step = %step.name, error = %e, "failed to spawn local worker");
                Ok((SubmissionCode::Error, "-1".to_string()))
            }
        }
    }
}

impl SchedulerScriptAdapter for LocalPoolAdapter {
    fn batch_parameters(&self) -> &HashMap<String, String> {
        &self.batch
    }

    fn add_batch_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.batch.insert(name.into(), value.into());
    }

    fn get_header(&self, _step: &StudyStep) -> Result<String> {
        Ok(format!("#!{}", self.shell))
    }

    fn get_parallelize_command(
        &self,
        _procs: u32,
        _nodes: Option<u32>,
        _overrides: &LauncherOverride,
    ) -> String {
        String::new()
    }
}
