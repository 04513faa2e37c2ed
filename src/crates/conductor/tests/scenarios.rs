//! Cross-crate integration tests for the six concrete scenarios: one test
//! function per scenario, built by staging a real `Study` and driving the
//! result with a `Conductor`.

use conductor::{Conductor, DriverOutcome};
use params::LabelSpec;
use scheduler::LocalPoolAdapter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use study::{ExecutionGraph, Study, StudyStep, RunConfig, SOURCE};
use environment::StudyEnvironment;
use params::ParameterTable;
use scheduler::{CancelCode, JobStatusCode, LauncherOverride, ScriptAdapter, SchedulerScriptAdapter};
use utils::{State, SubmissionCode};

fn conductor_for(dir: &Path, graph: ExecutionGraph, adapter: Box<dyn SchedulerScriptAdapter>) -> Conductor {
    let registry = conductor::PriorityRegistry::new();
    let policies = registry.resolve(&["breadth_first".to_string()]).unwrap();
    Conductor::new(graph, adapter, dir, Duration::from_millis(10), policies)
}

fn stage(dir: &Path, table: ParameterTable, steps: Vec<StudyStep>) -> ExecutionGraph {
    let mut study = Study::new("demo", "", StudyEnvironment::new(), table, dir);
    for step in steps {
        study.add_step(step).unwrap();
    }
    study.setup(1, 1, 0).unwrap();
    study.stage().unwrap()
}

fn step(name: &str, cmd: &str, depends: Vec<&str>) -> StudyStep {
    StudyStep::new(
        name,
        "",
        RunConfig {
            cmd: cmd.to_string(),
            depends: depends.into_iter().map(String::from).collect(),
            ..Default::default()
        },
    )
}

#[test]
fn scenario_1_linear_hello_world() {
    let dir = tempfile::tempdir().unwrap();
    let graph = stage(dir.path(), ParameterTable::new(), vec![step("hello", "echo hi > out.txt", vec![])]);
    assert_eq!(graph.dag.node_count(), 2);
    assert!(graph.dag.contains_node(SOURCE));
    assert!(graph.dag.contains_node("hello"));
    assert_eq!(graph.dag.successors(SOURCE).to_vec(), vec!["hello".to_string()]);

    let mut conductor = conductor_for(dir.path(), graph, Box::new(LocalPoolAdapter::new(4)));
    let outcome = conductor.run_loop().unwrap();
    assert_eq!(outcome, DriverOutcome::Finished);
    assert_eq!(outcome.exit_code(), 0);
    assert!(dir.path().join("hello").join("out.txt").exists());
}

#[test]
fn scenario_2_two_step_parameterized() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = ParameterTable::new();
    table
        .add_parameter("NAME", vec!["Pam".into(), "Jim".into()], LabelSpec::Pattern("NAME.%%".into()), None)
        .unwrap();

    let graph = stage(
        dir.path(),
        table,
        vec![
            step("greet", "echo $(NAME) > g.txt", vec![]),
            step("bye", "cat $(greet.workspace)/g.txt > b.txt", vec!["greet"]),
        ],
    );

    for name in ["greet_NAME.Pam", "greet_NAME.Jim", "bye_NAME.Pam", "bye_NAME.Jim"] {
        assert!(graph.dag.contains_node(name), "missing node {name}");
    }
    assert!(graph.dag.successors("greet_NAME.Pam").contains(&"bye_NAME.Pam".to_string()));
    assert!(graph.dag.successors("greet_NAME.Jim").contains(&"bye_NAME.Jim".to_string()));
    assert!(!graph.dag.successors("greet_NAME.Pam").contains(&"bye_NAME.Jim".to_string()));

    let mut conductor = conductor_for(dir.path(), graph, Box::new(LocalPoolAdapter::new(4)));
    let outcome = conductor.run_loop().unwrap();
    assert_eq!(outcome, DriverOutcome::Finished);
}

#[test]
fn scenario_3_funnel_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let mut table = ParameterTable::new();
    table
        .add_parameter("NAME", vec!["Pam".into(), "Jim".into()], LabelSpec::Pattern("NAME.%%".into()), None)
        .unwrap();

    let graph = stage(
        dir.path(),
        table,
        vec![
            step("greet", "echo $(NAME) > g.txt", vec![]),
            step("summary", "ls $(greet.workspace) > s.txt", vec!["greet_*"]),
        ],
    );

    assert!(graph.dag.contains_node("summary"));
    assert!(graph.dag.successors("greet_NAME.Pam").contains(&"summary".to_string()));
    assert!(graph.dag.successors("greet_NAME.Jim").contains(&"summary".to_string()));

    let root_workspace = dir.path().join("greet");
    let summary_cmd = &graph.record("summary").unwrap().step.as_ref().unwrap().run.cmd;
    assert!(summary_cmd.contains(root_workspace.to_string_lossy().as_ref()));

    let mut conductor = conductor_for(dir.path(), graph, Box::new(LocalPoolAdapter::new(4)));
    let outcome = conductor.run_loop().unwrap();
    assert_eq!(outcome, DriverOutcome::Finished);
}

/// A fake adapter that reports TIMEDOUT for the step's first two status
/// checks (however many jobids it has been resubmitted under), then
/// FINISHED, counting how many times `submit` is called so the restart
/// count can be asserted precisely.
#[derive(Debug)]
struct FlakyAdapter {
    batch: HashMap<String, String>,
    submissions: std::sync::Arc<Mutex<u32>>,
    checks_so_far: Mutex<u32>,
}

impl FlakyAdapter {
    fn new(submissions: std::sync::Arc<Mutex<u32>>) -> Self {
        FlakyAdapter {
            batch: HashMap::new(),
            submissions,
            checks_so_far: Mutex::new(0),
        }
    }
}

impl ScriptAdapter for FlakyAdapter {
    fn check_jobs(&self, joblist: &[String]) -> scheduler::error::Result<(JobStatusCode, HashMap<String, State>)> {
        let mut checks = self.checks_so_far.lock().unwrap();
        *checks += 1;
        let state = if *checks <= 2 { State::TimedOut } else { State::Finished };
        let out = joblist.iter().map(|j| (j.clone(), state)).collect();
        Ok((JobStatusCode::Ok, out))
    }

    fn cancel_jobs(&self, _joblist: &[String]) -> scheduler::error::Result<CancelCode> {
        Ok(CancelCode::Ok)
    }

    fn write_script_impl(
        &self,
        ws_path: &Path,
        step: &StudyStep,
    ) -> scheduler::error::Result<(bool, PathBuf, Option<PathBuf>)> {
        let script = ws_path.join(format!("{}.sh", step.name));
        std::fs::write(&script, "#!/bin/bash\ntrue\n")?;
        let restart = if step.run.restart.is_empty() {
            None
        } else {
            let restart_path = ws_path.join(format!("{}.restart.sh", step.name));
            std::fs::write(&restart_path, "#!/bin/bash\ntrue\n")?;
            Some(restart_path)
        };
        Ok((true, script, restart))
    }

    fn submit(
        &self,
        _step: &StudyStep,
        _path: &Path,
        _cwd: &Path,
        _env: Option<&HashMap<String, String>>,
    ) -> scheduler::error::Result<(SubmissionCode, String)> {
        let mut submissions = self.submissions.lock().unwrap();
        *submissions += 1;
        Ok((SubmissionCode::Ok, submissions.to_string()))
    }
}

impl SchedulerScriptAdapter for FlakyAdapter {
    fn batch_parameters(&self) -> &HashMap<String, String> {
        &self.batch
    }

    fn add_batch_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.batch.insert(name.into(), value.into());
    }

    fn get_header(&self, _step: &StudyStep) -> scheduler::error::Result<String> {
        Ok("#!/bin/bash".to_string())
    }

    fn get_parallelize_command(&self, _procs: u32, _nodes: Option<u32>, _overrides: &LauncherOverride) -> String {
        String::new()
    }
}

#[test]
fn scenario_4_restart_on_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let graph = stage(
        dir.path(),
        ParameterTable::new(),
        vec![StudyStep::new(
            "flaky",
            "",
            RunConfig {
                cmd: "true".to_string(),
                restart: "do_again.sh".to_string(),
                ..Default::default()
            },
        )],
    );

    let mut study_restart_limit_graph = graph;
    if let Some(record) = study_restart_limit_graph.record_mut("flaky") {
        record.restart_limit = 2;
    }

    let submissions = std::sync::Arc::new(Mutex::new(0));
    let adapter = FlakyAdapter::new(submissions.clone());
    let mut conductor = conductor_for(dir.path(), study_restart_limit_graph, Box::new(adapter));
    let outcome = conductor.run_loop().unwrap();

    assert_eq!(outcome, DriverOutcome::Finished);
    assert_eq!(conductor.graph().record("flaky").unwrap().num_restarts, 2);
    assert_eq!(*submissions.lock().unwrap(), 3);
}

#[test]
fn scenario_5_cascading_failure() {
    let dir = tempfile::tempdir().unwrap();
    let graph = stage(
        dir.path(),
        ParameterTable::new(),
        vec![
            step("a", "false", vec![]),
            step("b", "true", vec!["a"]),
            step("c", "true", vec!["b"]),
        ],
    );

    let mut conductor = conductor_for(dir.path(), graph, Box::new(LocalPoolAdapter::new(4)));
    let outcome = conductor.run_loop().unwrap();

    assert_eq!(outcome, DriverOutcome::Failed);
    for name in ["a", "b", "c"] {
        assert!(conductor.graph().failed.contains(name), "{name} should have failed");
    }
    assert!(!conductor.graph().completed.contains("b"));
    assert!(!conductor.graph().completed.contains("c"));

    let status = Conductor::get_status(dir.path()).unwrap();
    for name in ["a", "b", "c"] {
        assert_eq!(status.get(name), Some(&State::Failed));
    }
}

#[test]
fn scenario_6_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let graph = stage(
        dir.path(),
        ParameterTable::new(),
        vec![step("long_one", "sleep 5", vec![]), step("long_two", "sleep 5", vec![])],
    );

    let mut conductor = conductor_for(dir.path(), graph, Box::new(LocalPoolAdapter::new(4)));
    // Get both steps submitted and running before cancelling.
    conductor.tick().unwrap();

    Conductor::mark_cancelled(dir.path()).unwrap();
    let outcome = conductor.tick().unwrap();

    assert_eq!(outcome, DriverOutcome::Cancelled);
    assert_eq!(outcome.exit_code(), 2);
    assert!(!dir.path().join(".cancel.lock").exists());
    for name in ["long_one", "long_two"] {
        assert_eq!(conductor.graph().record(name).unwrap().state, State::Cancelled);
    }
}
