//! `StudyDescription`: the validated, in-memory view of a study specification
//! the driver consumes. Parsing/validating the on-disk document is outside
//! this crate's scope; this struct is what a loader hands the conductor.

use crate::error::Result;
use environment::{Dependency, GitDependency, GitRef, PathDependency, StudyEnvironment, Substitution, Variable};
use params::{LabelSpec, ParameterTable};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use study::StudyStep;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DependencySpec {
    Path {
        name: String,
        path: String,
    },
    Git {
        name: String,
        url: String,
        path: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        hash: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    pub values: Vec<String>,
    pub label: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_submission_attempts() -> u32 {
    1
}

fn default_restart_limit() -> u32 {
    1
}

/// One entry of the execution block: a policy name paired with its
/// (currently unused, opaque) configuration value.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionEntry(pub BTreeMap<String, serde_yaml::Value>);

impl ExecutionEntry {
    pub fn policy_name(&self) -> Option<&str> {
        self.0.keys().next().map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudyDescription {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub output_path: PathBuf,
    #[serde(default)]
    pub env: EnvironmentSpec,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub study: Vec<StudyStep>,
    #[serde(default)]
    pub batch: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub execution: Vec<ExecutionEntry>,
    #[serde(default = "default_submission_attempts")]
    pub submission_attempts: u32,
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
    #[serde(default)]
    pub submission_throttle: u32,
    #[serde(default)]
    pub sleep_time: Option<u64>,
}

impl StudyDescription {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn study_steps(&self) -> &[StudyStep] {
        &self.study
    }

    pub fn execution_policy_names(&self) -> Vec<String> {
        self.execution
            .iter()
            .filter_map(|entry| entry.policy_name().map(str::to_string))
            .collect()
    }

    /// Build the `StudyEnvironment` this description names: plain variables
    /// and labels first (so dependency substitution can reference them),
    /// then dependencies, in key order for determinism.
    pub fn study_environment(&self) -> Result<StudyEnvironment> {
        let mut env = StudyEnvironment::new();

        for (name, value) in &self.env.variables {
            env.add_substitution(Box::new(Variable::new(name, value, "$")?))?;
        }
        for (name, value) in &self.env.labels {
            env.add_substitution(Box::new(Variable::new(name, value, "$")?))?;
        }
        for dep in &self.env.dependencies {
            match dep {
                DependencySpec::Path { name, path } => {
                    env.add_dependency(Box::new(PathDependency::new(name, path, "$")?))?;
                }
                DependencySpec::Git { name, url, path, branch, tag, hash } => {
                    let reference = GitRef {
                        branch: branch.clone(),
                        tag: tag.clone(),
                        hash: hash.clone(),
                    };
                    env.add_dependency(Box::new(GitDependency::new(name, url, path, "$", reference)?))?;
                }
            }
        }

        Ok(env)
    }

    /// Build the `ParameterTable` this description names, in key order.
    pub fn parameters(&self) -> Result<ParameterTable> {
        let mut table = ParameterTable::new();
        for (key, spec) in &self.parameters {
            table.add_parameter(
                key,
                spec.values.clone(),
                LabelSpec::Pattern(spec.label.clone()),
                spec.name.as_deref(),
            )?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_linear_description() {
        let yaml = r#"
name: demo
description: a demo study
output_path: /tmp/demo-study
study:
  - name: hello
    description: says hello
    run:
      cmd: echo hi > out.txt
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.yaml");
        std::fs::write(&path, yaml).unwrap();

        let description = StudyDescription::load(&path).unwrap();
        assert_eq!(description.name, "demo");
        assert_eq!(description.study_steps().len(), 1);
        assert!(description.parameters().unwrap().is_empty());
    }

    #[test]
    fn builds_environment_with_variables_and_a_path_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            r#"
name: demo
output_path: /tmp/demo-study
env:
  variables:
    OUTPUT: /tmp/study
  dependencies:
    - type: path
      name: DATA
      path: {}
study:
  - name: hello
    description: ""
    run:
      cmd: echo $(OUTPUT)
"#,
            dir.path().display()
        );
        let path = dir.path().join("study.yaml");
        std::fs::write(&path, yaml).unwrap();

        let description = StudyDescription::load(&path).unwrap();
        let env = description.study_environment().unwrap();
        assert!(env.find("OUTPUT").is_some());
        assert!(env.find("DATA").is_some());
    }

    #[test]
    fn parses_parameters_and_execution_block() {
        let yaml = r#"
name: demo
output_path: /tmp/demo-study
parameters:
  NAME:
    values: ["Pam", "Jim"]
    label: "NAME.%%"
execution:
  - breadth_first: {}
study:
  - name: greet
    description: ""
    run:
      cmd: echo $(NAME)
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.yaml");
        std::fs::write(&path, yaml).unwrap();

        let description = StudyDescription::load(&path).unwrap();
        let table = description.parameters().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(description.execution_policy_names(), vec!["breadth_first".to_string()]);
    }
}
