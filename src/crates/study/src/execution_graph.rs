//! `ExecutionGraph`: the expanded, concrete DAG a `Study` stages into —
//! every node is an `ExecutionStepRecord` tracking one submission's worth
//! of runtime state.

use crate::error::Result;
use crate::step::StudyStep;
use dag::Dag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use utils::State;

pub const SOURCE: &str = "_source";

/// The runtime state of one concrete, possibly parameter-expanded step.
/// Owned exclusively by its `ExecutionGraph`; only the driver mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStepRecord {
    pub workspace: String,
    pub state: State,
    pub jobids: Vec<String>,
    pub script: String,
    pub restart_script: Option<String>,
    pub to_be_scheduled: bool,
    pub step: Option<StudyStep>,
    pub restart_limit: u32,
    pub num_restarts: u32,
    pub submit_time: Option<chrono::DateTime<chrono::Utc>>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    /// The `(key, value)` pairs of the combination that produced this
    /// record, restricted to the keys the step actually uses. Empty for
    /// parameter-independent steps.
    pub params: Vec<(String, String)>,
}

impl ExecutionStepRecord {
    pub fn new(step: StudyStep, workspace: impl Into<String>, restart_limit: u32) -> Self {
        ExecutionStepRecord {
            workspace: workspace.into(),
            state: State::Initialized,
            jobids: Vec::new(),
            script: String::new(),
            restart_script: None,
            to_be_scheduled: false,
            step: Some(step),
            restart_limit,
            num_restarts: 0,
            submit_time: None,
            start_time: None,
            end_time: None,
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    fn source() -> Self {
        ExecutionStepRecord {
            workspace: String::new(),
            state: State::Finished,
            jobids: Vec::new(),
            script: String::new(),
            restart_script: None,
            to_be_scheduled: false,
            step: None,
            restart_limit: 0,
            num_restarts: 0,
            submit_time: None,
            start_time: None,
            end_time: None,
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub adapter_type: String,
    pub host: Option<String>,
    pub bank: Option<String>,
    pub queue: Option<String>,
}

/// The expanded DAG a study stages into, plus the bookkeeping sets the
/// driver loop maintains as steps progress.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub dag: Dag<ExecutionStepRecord>,
    pub name: String,
    pub description: String,
    pub adapter: Option<AdapterConfig>,
    pub completed: HashSet<String>,
    pub in_progress: HashSet<String>,
    pub failed: HashSet<String>,
    submission_attempts: u32,
    submission_throttle: u32,
}

impl ExecutionGraph {
    pub fn new(submission_attempts: u32, submission_throttle: u32) -> Self {
        let mut dag = Dag::new();
        dag.add_node(SOURCE, ExecutionStepRecord::source());
        let mut completed = HashSet::new();
        completed.insert(SOURCE.to_string());

        ExecutionGraph {
            dag,
            name: String::new(),
            description: String::new(),
            adapter: None,
            completed,
            in_progress: HashSet::new(),
            failed: HashSet::new(),
            submission_attempts,
            submission_throttle,
        }
    }

    pub fn submission_attempts(&self) -> u32 {
        self.submission_attempts
    }

    pub fn submission_throttle(&self) -> u32 {
        self.submission_throttle
    }

    pub fn add_description(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.name = name.into();
        self.description = description.into();
    }

    pub fn set_adapter(&mut self, adapter: Option<AdapterConfig>) {
        self.adapter = adapter;
    }

    pub fn add_step(&mut self, name: impl Into<String>, record: ExecutionStepRecord) {
        self.dag.add_node(name, record);
    }

    pub fn add_connection(&mut self, src: &str, dest: &str) -> Result<()> {
        self.dag.add_edge(src, dest)?;
        Ok(())
    }

    pub fn record(&self, name: &str) -> Option<&ExecutionStepRecord> {
        self.dag.value(name)
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut ExecutionStepRecord> {
        self.dag.value_mut(name)
    }

    pub fn is_complete(&self) -> bool {
        let all: HashSet<&str> = self.dag.names().collect();
        let resolved: HashSet<&str> = self
            .completed
            .iter()
            .chain(self.failed.iter())
            .map(|s| s.as_str())
            .collect();
        all.iter().all(|n| resolved.contains(n))
    }

    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let graph = bincode::deserialize(&bytes)?;
        Ok(graph)
    }
}
