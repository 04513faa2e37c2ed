//! `Study`: the abstract DAG of `StudyStep`s, its environment, and its
//! parameter table. `stage()` expands it into a concrete `ExecutionGraph`.

use crate::error::{Result, StudyError};
use crate::execution_graph::{ExecutionGraph, ExecutionStepRecord, SOURCE};
use crate::step::StudyStep;
use dag::Dag;
use environment::StudyEnvironment;
use once_cell::sync::Lazy;
use params::ParameterTable;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Matches a dependency name's wildcard "all combinations" marker, either
/// as a standalone `*` or a trailing `_*`.
static ALL_COMBOS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_\*|\*").unwrap());

/// Matches a `$(STEP.workspace)` reference inside a command string.
static WORKSPACE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\(([-!$%^&*()_+|~=`{}\[\]:;<>?,./\w]+)\.workspace\)").unwrap()
});

fn strip_wildcard(dependency: &str) -> String {
    ALL_COMBOS.replace_all(dependency, "").into_owned()
}

pub struct Study {
    pub name: String,
    pub description: String,
    flow: Dag<Option<StudyStep>>,
    environment: StudyEnvironment,
    parameters: ParameterTable,
    out_path: PathBuf,
    is_set_up: bool,
    submission_attempts: u32,
    restart_limit: u32,
    submission_throttle: u32,
}

impl Study {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        environment: StudyEnvironment,
        parameters: ParameterTable,
        out_path: impl Into<PathBuf>,
    ) -> Self {
        let mut flow = Dag::new();
        flow.add_node(SOURCE, None);

        Study {
            name: name.into(),
            description: description.into(),
            flow,
            environment,
            parameters,
            out_path: out_path.into(),
            is_set_up: false,
            submission_attempts: 1,
            restart_limit: 1,
            submission_throttle: 0,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.out_path
    }

    /// Add a step, inferring its edges from `run.depends`. Steps with a
    /// wildcard dependency (`name*`) connect from the bare step name; steps
    /// with no dependency connect from the source node.
    pub fn add_step(&mut self, step: StudyStep) -> Result<()> {
        let name = step.name.clone();
        let depends = step.run.depends.clone();
        self.flow.add_node(name.clone(), Some(step));

        if depends.is_empty() {
            self.flow.add_edge(SOURCE, &name)?;
            return Ok(());
        }

        for dependency in &depends {
            if dependency.contains('*') {
                self.flow.add_edge(&strip_wildcard(dependency), &name)?;
            } else {
                self.flow.add_edge(dependency, &name)?;
            }
        }
        Ok(())
    }

    /// A DFS spanning tree over the abstract flow, rooted at the source.
    pub fn walk_study(&self) -> Vec<(Option<String>, String, Option<&StudyStep>)> {
        let (path, parents) = self.flow.dfs_subtree(SOURCE);
        path.into_iter()
            .map(|node| {
                let parent = parents.get(&node).cloned().flatten();
                let value = self.flow.value(&node).and_then(|v| v.as_ref());
                (parent, node, value)
            })
            .collect()
    }

    /// Acquire the environment, create the output directory, and apply the
    /// environment to every step's fields. Idempotent.
    pub fn setup(
        &mut self,
        submission_attempts: u32,
        restart_limit: u32,
        throttle: u32,
    ) -> Result<()> {
        if self.is_set_up {
            tracing::info!(study = %self.name, "already set up");
            return Ok(());
        }

        self.submission_attempts = submission_attempts;
        self.restart_limit = restart_limit;
        self.submission_throttle = throttle;

        if !self.environment.is_set_up() {
            self.environment.acquire_environment()?;
        }

        std::fs::create_dir_all(&self.out_path)?;

        let names: Vec<String> = self.flow.names().map(String::from).collect();
        for name in names {
            if let Some(Some(step)) = self.flow.value(&name) {
                let substituted = step.apply_environment(&self.environment);
                *self.flow.value_mut(&name).unwrap() = Some(substituted);
            }
        }

        self.is_set_up = true;
        Ok(())
    }

    /// Expand the study into an `ExecutionGraph`: the parameterized path if
    /// a parameter table is present, the linear path otherwise.
    pub fn stage(&self) -> Result<ExecutionGraph> {
        if !self.is_set_up {
            return Err(StudyError::NotSetUp(self.name.clone()));
        }

        if self.parameters.is_empty() {
            self.setup_linear()
        } else {
            self.setup_parameterized()
        }
    }

    fn setup_linear(&self) -> Result<ExecutionGraph> {
        let mut graph = ExecutionGraph::new(self.submission_attempts, self.submission_throttle);
        graph.add_description(self.name.clone(), self.description.clone());

        for step_name in self.flow.topological_sort() {
            if step_name == SOURCE {
                continue;
            }
            let node = self
                .flow
                .value(&step_name)
                .and_then(|v| v.as_ref())
                .expect("non-source node always carries a step");

            let rlimit = if node.run.restart.is_empty() { 0 } else { self.restart_limit };
            let workspace = utils::path::make_safe_path(&self.out_path, &[step_name.as_str()]);
            graph.add_step(
                step_name.clone(),
                ExecutionStepRecord::new(node.clone(), workspace.to_string_lossy().into_owned(), rlimit),
            );

            if node.run.depends.is_empty() {
                graph.add_connection(SOURCE, &step_name)?;
            } else {
                for parent in &node.run.depends {
                    graph.add_connection(parent, &step_name)?;
                }
            }
        }

        Ok(graph)
    }

    fn setup_parameterized(&self) -> Result<ExecutionGraph> {
        let mut graph = ExecutionGraph::new(self.submission_attempts, self.submission_throttle);
        graph.add_description(self.name.clone(), self.description.clone());

        let mut workspaces: HashMap<String, String> = HashMap::new();
        workspaces.insert(SOURCE.to_string(), self.out_path.to_string_lossy().into_owned());
        let mut hub_depends: HashMap<String, HashSet<String>> = HashMap::new();
        hub_depends.insert(SOURCE.to_string(), HashSet::new());
        let mut depends: HashMap<String, HashSet<String>> = HashMap::new();
        depends.insert(SOURCE.to_string(), HashSet::new());
        let mut used_params: HashMap<String, HashSet<String>> = HashMap::new();
        used_params.insert(SOURCE.to_string(), HashSet::new());
        let mut step_combos: HashMap<String, HashSet<String>> = HashMap::new();
        step_combos.insert(SOURCE.to_string(), HashSet::new());

        for step_name in self.flow.topological_sort() {
            if step_name == SOURCE {
                continue;
            }

            tracing::info!(step = %step_name, "processing step");
            let node = self
                .flow
                .value(&step_name)
                .and_then(|v| v.as_ref())
                .expect("non-source node always carries a step");

            hub_depends.insert(step_name.clone(), HashSet::new());
            depends.insert(step_name.clone(), HashSet::new());
            step_combos.insert(step_name.clone(), HashSet::new());

            let step_value = serde_json::to_value(node).unwrap_or(serde_json::Value::Null);
            let s_params = self.parameters.get_used_parameters(&step_value);
            let mut p_params: HashSet<String> = HashSet::new();

            for parent in &node.run.depends {
                if parent.contains('*') {
                    hub_depends.get_mut(&step_name).unwrap().insert(strip_wildcard(parent));
                } else {
                    depends.get_mut(&step_name).unwrap().insert(parent.clone());
                    if let Some(parent_params) = used_params.get(parent) {
                        p_params.extend(parent_params.iter().cloned());
                    }
                }
            }

            let used_spaces: Vec<String> = WORKSPACE_REF
                .captures_iter(&node.run.cmd)
                .map(|cap| cap[1].to_string())
                .collect();

            for ws in &used_spaces {
                if !used_params.contains_key(ws) {
                    return Err(StudyError::WorkspaceUsedBeforeGeneration(ws.clone()));
                }
                if hub_depends[&step_name].contains(ws) {
                    continue;
                }
                p_params.extend(used_params[ws].iter().cloned());
            }

            let step_used_params: HashSet<String> = p_params.union(&s_params).cloned().collect();
            used_params.insert(step_name.clone(), step_used_params.clone());

            let rlimit = if node.run.restart.is_empty() { 0 } else { self.restart_limit };

            if step_used_params.is_empty() {
                step_combos.get_mut(&step_name).unwrap().insert(step_name.clone());

                let workspace = utils::path::make_safe_path(&self.out_path, &[step_name.as_str()]);
                let workspace_str = workspace.to_string_lossy().into_owned();
                workspaces.insert(step_name.clone(), workspace_str.clone());

                let mut cmd = node.run.cmd.clone();
                for m in &used_spaces {
                    let workspace_var = format!("$({}.workspace)", m);
                    let ws = if hub_depends[&step_name].contains(m) {
                        utils::path::make_safe_path(&self.out_path, &[m.as_str()]).to_string_lossy().into_owned()
                    } else {
                        workspaces[m].clone()
                    };
                    cmd = cmd.replace(&workspace_var, &ws);
                }

                let mut expanded = node.clone();
                expanded.run.cmd = cmd;
                graph.add_step(
                    step_name.clone(),
                    ExecutionStepRecord::new(expanded, workspace_str, rlimit),
                );

                if !depends[&step_name].is_empty() || !hub_depends[&step_name].is_empty() {
                    for parent in &depends[&step_name] {
                        graph.add_connection(parent, &step_name)?;
                    }
                    for parent in &hub_depends[&step_name] {
                        if let Some(combos) = step_combos.get(parent) {
                            for item in combos.clone() {
                                graph.add_connection(&item, &step_name)?;
                            }
                        }
                    }
                } else {
                    graph.add_connection(SOURCE, &step_name)?;
                }
            } else {
                for combo in self.parameters.combinations() {
                    let combo_suffix = combo.param_string(&step_used_params);
                    let workspace =
                        utils::path::make_safe_path(&self.out_path, &[step_name.as_str(), combo_suffix.as_str()]);
                    let workspace_str = workspace.to_string_lossy().into_owned();
                    let combo_str = format!("{}_{}", step_name, combo_suffix);
                    // Keyed by combo_str, not the bare step name: a parameterized
                    // step has one workspace per combination, and dependents look
                    // this up via their own combo's `used_params[parent]` subset.
                    workspaces.insert(combo_str.clone(), workspace_str.clone());

                    if step_combos[&step_name].contains(&combo_str) {
                        continue;
                    }
                    step_combos.get_mut(&step_name).unwrap().insert(combo_str.clone());

                    let (_, mut step_exp) = node.apply_parameters(&combo);
                    step_exp.name = combo_str.clone();

                    let mut cmd = step_exp.run.cmd.clone();
                    for m in &used_spaces {
                        let workspace_var = format!("$({}.workspace)", m);
                        let ws = if hub_depends[&step_name].contains(m) {
                            utils::path::make_safe_path(&self.out_path, &[m.as_str()]).to_string_lossy().into_owned()
                        } else if used_params[m].is_empty() {
                            workspaces[m].clone()
                        } else {
                            let parent_combo_str = format!("{}_{}", m, combo.param_string(&used_params[m]));
                            workspaces
                                .get(&parent_combo_str)
                                .cloned()
                                .unwrap_or_default()
                        };
                        cmd = cmd.replace(&workspace_var, &ws);
                    }
                    step_exp.run.cmd = cmd;

                    let row_params: Vec<(String, String)> = combo
                        .param_vals()
                        .iter()
                        .filter(|(k, _)| step_used_params.contains(k))
                        .cloned()
                        .collect();

                    graph.add_step(
                        combo_str.clone(),
                        ExecutionStepRecord::new(step_exp, workspace_str.clone(), rlimit)
                            .with_params(row_params),
                    );

                    if !depends[&step_name].is_empty() || !hub_depends[&step_name].is_empty() {
                        for p in &depends[&step_name] {
                            let edge_src = if used_params.get(p).map(|s| !s.is_empty()).unwrap_or(false) {
                                format!("{}_{}", p, combo.param_string(&used_params[p]))
                            } else {
                                p.clone()
                            };
                            graph.add_connection(&edge_src, &combo_str)?;
                        }
                        for parent in &hub_depends[&step_name] {
                            if let Some(combos) = step_combos.get(parent) {
                                for item in combos.clone() {
                                    graph.add_connection(&item, &combo_str)?;
                                }
                            }
                        }
                    } else {
                        graph.add_connection(SOURCE, &combo_str)?;
                    }
                }
            }
        }

        Ok(graph)
    }
}
