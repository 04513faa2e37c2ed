//! `Conductor`: the single-threaded driver loop. Each `tick()` runs the
//! cancellation/termination/status/admission/submission/persistence
//! sequence once; `run_loop()` repeats it until a terminal outcome.

use crate::error::{ConductorError, Result};
use crate::priority::PriorityPolicyFn;
use crate::snapshot;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use study::{ExecutionGraph, SOURCE};
use utils::{JobStatusCode, State, SubmissionCode};

const CANCEL_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Finished,
    Failed,
    Cancelled,
    Running,
}

impl DriverOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            DriverOutcome::Finished => 0,
            DriverOutcome::Failed => 1,
            DriverOutcome::Cancelled => 2,
            DriverOutcome::Running => 3,
        }
    }
}

pub struct Conductor {
    graph: ExecutionGraph,
    adapter: Box<dyn scheduler::SchedulerScriptAdapter>,
    output_path: PathBuf,
    sleep_time: Duration,
    policies: Vec<PriorityPolicyFn>,
    depths: HashMap<String, u32>,
    parents: HashMap<String, Vec<String>>,
}

fn reverse_adjacency(graph: &ExecutionGraph) -> HashMap<String, Vec<String>> {
    let mut parents: HashMap<String, Vec<String>> = HashMap::new();
    for name in graph.dag.names() {
        parents.entry(name.to_string()).or_default();
    }
    for name in graph.dag.names() {
        for succ in graph.dag.successors(name) {
            parents.entry(succ.clone()).or_default().push(name.to_string());
        }
    }
    parents
}

fn compute_depths(graph: &ExecutionGraph) -> HashMap<String, u32> {
    let (path, parent_of) = graph.dag.bfs_subtree(SOURCE);
    let mut depths = HashMap::new();
    depths.insert(SOURCE.to_string(), 0);
    for node in path {
        if node == SOURCE {
            continue;
        }
        let depth = parent_of
            .get(&node)
            .and_then(|p| p.as_ref())
            .and_then(|p| depths.get(p))
            .copied()
            .unwrap_or(0)
            + 1;
        depths.insert(node, depth);
    }
    depths
}

impl Conductor {
    pub fn new(
        graph: ExecutionGraph,
        adapter: Box<dyn scheduler::SchedulerScriptAdapter>,
        output_path: impl Into<PathBuf>,
        sleep_time: Duration,
        policies: Vec<PriorityPolicyFn>,
    ) -> Self {
        let depths = compute_depths(&graph);
        let parents = reverse_adjacency(&graph);
        Conductor {
            graph,
            adapter,
            output_path: output_path.into(),
            sleep_time,
            policies,
            depths,
            parents,
        }
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    fn cancel_path(&self) -> PathBuf {
        self.output_path.join(".cancel.lock")
    }

    /// Write the batch block once at staging and ensure the log directory
    /// exists. Kept as an explicit step (not folded into `new`) so callers
    /// can interpose `store_study`/`load_study` between construction and
    /// the first tick when resuming a crashed run.
    pub fn initialize(&self, batch_info: &BTreeMap<String, serde_yaml::Value>) -> Result<()> {
        std::fs::create_dir_all(&self.output_path)?;
        std::fs::create_dir_all(self.output_path.join("logs"))?;
        Self::store_batch(&self.output_path, batch_info)?;
        Ok(())
    }

    /// Best-effort removal of stale temp/lock artifacts from a prior run.
    pub fn cleanup(&self) -> Result<()> {
        let tmp = self.output_path.join(".status.csv.tmp");
        if tmp.exists() {
            std::fs::remove_file(tmp)?;
        }
        Ok(())
    }

    pub fn store_study(output_path: &Path, name: &str, graph: &ExecutionGraph) -> Result<()> {
        let tmp = output_path.join(format!(".{}.pkl.tmp", name));
        let dest = output_path.join(format!("{}.pkl", name));
        graph.store(&tmp)?;
        std::fs::rename(&tmp, &dest)?;
        Ok(())
    }

    pub fn load_study(output_path: &Path, name: &str) -> Result<ExecutionGraph> {
        let path = output_path.join(format!("{}.pkl", name));
        Ok(ExecutionGraph::load(path)?)
    }

    pub fn store_batch(output_path: &Path, batch: &BTreeMap<String, serde_yaml::Value>) -> Result<()> {
        let path = output_path.join("batch.info");
        std::fs::write(path, serde_yaml::to_string(batch)?)?;
        Ok(())
    }

    pub fn load_batch(output_path: &Path) -> Result<BTreeMap<String, serde_yaml::Value>> {
        let content = std::fs::read_to_string(output_path.join("batch.info"))?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn get_status(output_path: &Path) -> Result<HashMap<String, State>> {
        let content = std::fs::read_to_string(output_path.join("status.csv"))?;
        Ok(snapshot::parse(&content))
    }

    pub fn mark_cancelled(output_path: &Path) -> Result<()> {
        std::fs::write(output_path.join(".cancel.lock"), b"")?;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        Self::store_study(&self.output_path, &self.graph.name, &self.graph)?;
        snapshot::write(&self.output_path, &self.graph)?;
        Ok(())
    }

    /// Move `name` and every node in its BFS subtree (itself included) that
    /// is not already terminal into `failed`.
    fn cascade_fail(&mut self, name: &str) {
        let (subtree, _) = self.graph.dag.bfs_subtree(name);
        let now = Some(Utc::now());
        for node in subtree {
            if self.graph.completed.contains(&node) || self.graph.failed.contains(&node) {
                continue;
            }
            self.graph.in_progress.remove(&node);
            self.graph.failed.insert(node.clone());
            if let Some(record) = self.graph.record_mut(&node) {
                record.state = State::Failed;
                if record.end_time.is_none() {
                    record.end_time = now;
                }
            }
        }
    }

    fn resubmit(&mut self, name: &str) -> Result<bool> {
        let Some(record) = self.graph.record(name) else { return Ok(false) };
        let Some(step) = record.step.clone() else { return Ok(false) };
        let workspace = PathBuf::from(&record.workspace);
        std::fs::create_dir_all(&workspace)?;

        let (_, script_path, restart_path) = self.adapter.write_script(&workspace, &step)?;
        let run_path = restart_path.unwrap_or(script_path);

        let mut ok = false;
        let attempts = self.graph.submission_attempts().max(1);
        let mut jobid = String::new();
        for _ in 0..attempts {
            let (code, id) = self.adapter.submit(&step, &run_path, &workspace, None)?;
            if code == SubmissionCode::Ok {
                ok = true;
                jobid = id;
                break;
            }
        }

        if ok {
            if let Some(record) = self.graph.record_mut(name) {
                record.jobids.push(jobid);
                record.state = State::Pending;
            }
            self.graph.in_progress.insert(name.to_string());
        }
        Ok(ok)
    }

    /// Run one tick of the driver sequence. Returns `Ok(Running)` when the
    /// study has more work left; a retryable status error is surfaced as
    /// `Err` and should not advance the tick counter in the caller.
    pub fn tick(&mut self) -> Result<DriverOutcome> {
        // 1. Cancellation check.
        let cancel_path = self.cancel_path();
        if cancel_path.exists() {
            let lock = utils::lock::FileLock::acquire(&cancel_path, CANCEL_LOCK_TIMEOUT)?;
            let joblist: Vec<String> = self
                .graph
                .in_progress
                .iter()
                .filter_map(|name| self.graph.record(name).and_then(|r| r.jobids.last().cloned()))
                .collect();
            if !joblist.is_empty() {
                self.adapter.cancel_jobs(&joblist)?;
            }

            let names: Vec<String> = self.graph.dag.names().map(String::from).collect();
            let now = Some(Utc::now());
            for name in names {
                if name == SOURCE {
                    continue;
                }
                let terminal = self.graph.completed.contains(&name) || self.graph.failed.contains(&name);
                if terminal {
                    continue;
                }
                self.graph.in_progress.remove(&name);
                if let Some(record) = self.graph.record_mut(&name) {
                    record.state = State::Cancelled;
                    record.end_time = now;
                }
            }
            drop(lock);
            std::fs::remove_file(&cancel_path)?;
            self.persist()?;
            return Ok(DriverOutcome::Cancelled);
        }

        // 2. Termination check.
        if self.graph.is_complete() {
            self.persist()?;
            return Ok(if self.graph.failed.is_empty() {
                DriverOutcome::Finished
            } else {
                DriverOutcome::Failed
            });
        }

        // 3. Status poll.
        let in_progress: Vec<String> = self.graph.in_progress.iter().cloned().collect();
        let joblist: Vec<String> = in_progress
            .iter()
            .filter_map(|name| self.graph.record(name).and_then(|r| r.jobids.last().cloned()))
            .collect();

        let mut states_by_name: HashMap<String, State> = HashMap::new();
        if !joblist.is_empty() {
            let (code, by_job) = self.adapter.check_jobs(&joblist)?;
            if code == JobStatusCode::Error {
                return Err(ConductorError::RetryableStatus(format!(
                    "check_jobs returned ERROR for {} job(s)",
                    joblist.len()
                )));
            }
            for name in &in_progress {
                if let Some(jobid) = self.graph.record(name).and_then(|r| r.jobids.last()) {
                    if let Some(state) = by_job.get(jobid) {
                        states_by_name.insert(name.clone(), *state);
                    }
                }
            }
        }

        // 4. State advance.
        let mut hwfailure_resubmits = Vec::new();
        for (name, state) in states_by_name {
            match state {
                State::Finished => {
                    self.graph.in_progress.remove(&name);
                    self.graph.completed.insert(name.clone());
                    if let Some(record) = self.graph.record_mut(&name) {
                        record.state = State::Finished;
                        record.end_time = Some(Utc::now());
                    }
                }
                State::TimedOut => {
                    let (restarts, limit) = self
                        .graph
                        .record(&name)
                        .map(|r| (r.num_restarts, r.restart_limit))
                        .unwrap_or((0, 0));
                    if restarts < limit {
                        if let Some(record) = self.graph.record_mut(&name) {
                            record.num_restarts += 1;
                        }
                        if !self.resubmit(&name)? {
                            self.cascade_fail(&name);
                        }
                    } else {
                        self.cascade_fail(&name);
                    }
                }
                State::HwFailure => hwfailure_resubmits.push(name),
                State::Failed => self.cascade_fail(&name),
                State::Running | State::Pending | State::Queued | State::Waiting => {
                    if let Some(record) = self.graph.record_mut(&name) {
                        record.state = state;
                        if state == State::Running && record.start_time.is_none() {
                            record.start_time = Some(Utc::now());
                        }
                    }
                }
                _ => {}
            }
        }

        for name in hwfailure_resubmits {
            if !self.resubmit(&name)? {
                self.cascade_fail(&name);
            }
        }

        // 5. Admission.
        let mut ready: Vec<String> = self
            .graph
            .dag
            .names()
            .map(String::from)
            .filter(|name| name != SOURCE)
            .filter(|name| matches!(self.graph.record(name).map(|r| r.state), Some(State::Initialized)))
            .filter(|name| {
                self.parents
                    .get(name)
                    .map(|ps| ps.iter().all(|p| self.graph.completed.contains(p)))
                    .unwrap_or(false)
            })
            .collect();

        // 6. Priority and throttle.
        let depths = &self.depths;
        let policies = &self.policies;
        ready.sort_by(|a, b| {
            let depth_a = depths.get(a).copied().unwrap_or(0);
            let depth_b = depths.get(b).copied().unwrap_or(0);
            crate::priority::priority_key(policies, depth_a, a)
                .cmp(&crate::priority::priority_key(policies, depth_b, b))
        });

        // Each step reserves max(1, procs) worker slots; admit in priority
        // order until the throttle's slot budget for this tick is spent.
        let step_slots = |name: &str| -> u32 {
            self.graph.record(name).and_then(|r| r.step.as_ref()).map(|s| s.run.slots()).unwrap_or(1)
        };
        let throttle = self.graph.submission_throttle();
        let in_progress_slots: u32 = self.graph.in_progress.iter().map(|name| step_slots(name)).sum();
        let capacity_slots = if throttle == 0 { u32::MAX } else { throttle.saturating_sub(in_progress_slots) };

        let mut used_slots: u32 = 0;
        ready.retain(|name| {
            let slots = step_slots(name);
            if used_slots.saturating_add(slots) > capacity_slots {
                return false;
            }
            used_slots += slots;
            true
        });

        // 7. Submit.
        for name in ready {
            let Some(record) = self.graph.record(&name) else { continue };
            let Some(step) = record.step.clone() else { continue };
            let workspace = PathBuf::from(&record.workspace);
            std::fs::create_dir_all(&workspace)?;

            let (to_be_scheduled, script_path, restart_path) = self.adapter.write_script(&workspace, &step)?;

            let attempts = self.graph.submission_attempts().max(1);
            let mut ok = false;
            let mut jobid = String::new();
            for _ in 0..attempts {
                let (code, id) = self.adapter.submit(&step, &script_path, &workspace, None)?;
                if code == SubmissionCode::Ok {
                    ok = true;
                    jobid = id;
                    break;
                }
            }

            if ok {
                let now = Some(Utc::now());
                if let Some(record) = self.graph.record_mut(&name) {
                    record.to_be_scheduled = to_be_scheduled;
                    record.script = script_path.to_string_lossy().into_owned();
                    record.restart_script = restart_path.map(|p| p.to_string_lossy().into_owned());
                    record.jobids.push(jobid);
                    record.submit_time = now;
                }
                if to_be_scheduled {
                    self.graph.in_progress.insert(name.clone());
                    if let Some(record) = self.graph.record_mut(&name) {
                        record.state = State::Pending;
                    }
                } else {
                    self.graph.completed.insert(name.clone());
                    if let Some(record) = self.graph.record_mut(&name) {
                        record.state = State::Finished;
                        record.end_time = now;
                    }
                }
            } else {
                self.cascade_fail(&name);
            }
        }

        // 8. Persist & snapshot.
        self.persist()?;

        Ok(DriverOutcome::Running)
    }

    /// Run ticks until a terminal outcome, sleeping `sleep_time` between
    /// non-terminal ticks. A retryable status error is logged and the loop
    /// continues at the next tick rather than aborting.
    pub fn run_loop(&mut self) -> Result<DriverOutcome> {
        loop {
            match self.tick() {
                Ok(DriverOutcome::Running) => std::thread::sleep(self.sleep_time),
                Ok(outcome) => return Ok(outcome),
                Err(ConductorError::RetryableStatus(detail)) => {
                    tracing::warn!(detail = %detail, "status poll failed, retrying next tick");
                    std::thread::sleep(self.sleep_time);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler::LocalPoolAdapter;
    use std::collections::HashSet;
    use study::{ExecutionStepRecord, RunConfig, StudyStep};

    fn one_step_graph(cmd: &str) -> ExecutionGraph {
        let mut graph = ExecutionGraph::new(1, 0);
        graph.add_description("demo", "");
        let step = StudyStep::new(
            "hello",
            "",
            RunConfig {
                cmd: cmd.to_string(),
                ..Default::default()
            },
        );
        graph.add_step("hello", ExecutionStepRecord::new(step, "hello-ws", 0));
        graph.add_connection(SOURCE, "hello").unwrap();
        graph
    }

    fn linear_two_step_graph(first: &str, second: &str) -> ExecutionGraph {
        let mut graph = ExecutionGraph::new(1, 0);
        graph.add_description("demo", "");
        let a = StudyStep::new(
            "a",
            "",
            RunConfig {
                cmd: first.to_string(),
                ..Default::default()
            },
        );
        let b = StudyStep::new(
            "b",
            "",
            RunConfig {
                cmd: second.to_string(),
                ..Default::default()
            },
        );
        graph.add_step("a", ExecutionStepRecord::new(a, "a-ws", 0));
        graph.add_step("b", ExecutionStepRecord::new(b, "b-ws", 0));
        graph.add_connection(SOURCE, "a").unwrap();
        graph.add_connection("a", "b").unwrap();
        graph
    }

    fn conductor_for(dir: &std::path::Path, graph: ExecutionGraph) -> Conductor {
        let mut graph = graph;
        for name in graph.dag.names().map(String::from).collect::<Vec<_>>() {
            if name == SOURCE {
                continue;
            }
            if let Some(record) = graph.record_mut(&name) {
                record.workspace = dir.join(&record.workspace).to_string_lossy().into_owned();
            }
        }

        let adapter = Box::new(LocalPoolAdapter::new(4));
        let registry = crate::priority::PriorityRegistry::new();
        let policies = registry.resolve(&["breadth_first".to_string()]).unwrap();
        Conductor::new(graph, adapter, dir, Duration::from_millis(10), policies)
    }

    #[test]
    fn run_loop_finishes_a_single_successful_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut conductor = conductor_for(dir.path(), one_step_graph("true"));
        let outcome = conductor.run_loop().unwrap();
        assert_eq!(outcome, DriverOutcome::Finished);
        assert_eq!(outcome.exit_code(), 0);
        assert!(dir.path().join("status.csv").exists());
    }

    #[test]
    fn run_loop_fails_when_a_step_exits_nonzero() {
        let dir = tempfile::tempdir().unwrap();
        let mut conductor = conductor_for(dir.path(), one_step_graph("false"));
        let outcome = conductor.run_loop().unwrap();
        assert_eq!(outcome, DriverOutcome::Failed);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn a_failed_step_cascades_to_its_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let mut conductor = conductor_for(dir.path(), linear_two_step_graph("false", "true"));
        let outcome = conductor.run_loop().unwrap();
        assert_eq!(outcome, DriverOutcome::Failed);
        assert!(conductor.graph().failed.contains("a"));
        assert!(conductor.graph().failed.contains("b"));
    }

    #[test]
    fn tick_honors_the_cancel_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut conductor = conductor_for(dir.path(), one_step_graph("sleep 5"));
        Conductor::mark_cancelled(dir.path()).unwrap();
        let outcome = conductor.tick().unwrap();
        assert_eq!(outcome, DriverOutcome::Cancelled);
        assert!(!dir.path().join(".cancel.lock").exists());
        let states: HashSet<State> = conductor
            .graph()
            .dag
            .names()
            .filter(|n| *n != SOURCE)
            .filter_map(|n| conductor.graph().record(n).map(|r| r.state))
            .collect();
        assert_eq!(states, HashSet::from([State::Cancelled]));
    }

    #[test]
    fn store_and_load_batch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut batch = BTreeMap::new();
        batch.insert("type".to_string(), serde_yaml::Value::from("local"));
        Conductor::store_batch(dir.path(), &batch).unwrap();
        let loaded = Conductor::load_batch(dir.path()).unwrap();
        assert_eq!(loaded.get("type").and_then(|v| v.as_str()), Some("local"));
    }

    #[test]
    fn get_status_reads_back_the_persisted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut conductor = conductor_for(dir.path(), one_step_graph("true"));
        conductor.run_loop().unwrap();
        let status = Conductor::get_status(dir.path()).unwrap();
        assert_eq!(status.get("hello"), Some(&State::Finished));
    }
}
