//! `StudyStep`: the 1:1 in-memory mapping of a single step from a study
//! specification, plus the resource request it carries.

use crate::error::{Result, StudyError};
use environment::StudyEnvironment;
use params::Combination;
use serde::{Deserialize, Serialize};

/// A step's resource request and command text. Every string field may still
/// contain unresolved `$(...)` tokens until a combination or environment is
/// applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub cmd: String,
    pub restart: String,
    pub depends: Vec<String>,
    pub pre: String,
    pub post: String,
    pub nodes: String,
    pub procs: String,
    pub cores_per_task: String,
    pub gpus: String,
    pub walltime: String,
    pub reservation: String,
    pub priority: String,
    pub exclusive: bool,
}

impl RunConfig {
    /// Normalize `walltime` to whole seconds. A bare number is treated as
    /// minutes; a colon-separated value is treated as `H:M:S` (fewer
    /// fields are allowed: `M:S` or just `S`).
    pub fn walltime_seconds(&self) -> Result<Option<u64>> {
        let raw = self.walltime.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        if raw.contains(':') {
            let mut total: u64 = 0;
            for part in raw.split(':') {
                let value: u64 = part
                    .parse()
                    .map_err(|_| StudyError::InvalidWalltime(self.walltime.clone()))?;
                total = total * 60 + value;
            }
            return Ok(Some(total));
        }

        let minutes: f64 = raw
            .parse()
            .map_err(|_| StudyError::InvalidWalltime(self.walltime.clone()))?;
        Ok(Some((minutes * 60.0) as u64))
    }

    /// Worker slots this step reserves for local/throttled concurrency:
    /// `max(1, procs)`, falling back to 1 when `procs` is empty or not a
    /// plain integer.
    pub fn slots(&self) -> u32 {
        self.procs.trim().parse::<u32>().unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyStep {
    pub name: String,
    pub description: String,
    pub run: RunConfig,
}

impl StudyStep {
    pub fn new(name: impl Into<String>, description: impl Into<String>, run: RunConfig) -> Self {
        StudyStep {
            name: name.into(),
            description: description.into(),
            run,
        }
    }

    /// Apply a parameter combination to every substitutable string field,
    /// returning a new step and whether anything actually changed.
    pub fn apply_parameters(&self, combo: &Combination) -> (bool, StudyStep) {
        let out = self.apply_fn(|s| combo.apply(s));
        let modified = *self != out;
        (modified, out)
    }

    /// Apply a study environment's labels/dependencies/substitutions to
    /// every substitutable string field.
    pub fn apply_environment(&self, env: &StudyEnvironment) -> StudyStep {
        self.apply_fn(|s| env.apply_environment(s))
    }

    fn apply_fn(&self, f: impl Fn(&str) -> String) -> StudyStep {
        let mut out = self.clone();
        out.description = f(&out.description);
        out.run.cmd = f(&out.run.cmd);
        out.run.restart = f(&out.run.restart);
        out.run.pre = f(&out.run.pre);
        out.run.post = f(&out.run.post);
        out.run.nodes = f(&out.run.nodes);
        out.run.procs = f(&out.run.procs);
        out.run.cores_per_task = f(&out.run.cores_per_task);
        out.run.gpus = f(&out.run.gpus);
        out.run.walltime = f(&out.run.walltime);
        out.run.reservation = f(&out.run.reservation);
        out.run.priority = f(&out.run.priority);
        out.run.depends = out.run.depends.iter().map(|d| f(d)).collect();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walltime_parses_bare_number_as_minutes() {
        let run = RunConfig {
            walltime: "5".into(),
            ..Default::default()
        };
        assert_eq!(run.walltime_seconds().unwrap(), Some(300));
    }

    #[test]
    fn walltime_parses_hms() {
        let run = RunConfig {
            walltime: "1:02:03".into(),
            ..Default::default()
        };
        assert_eq!(run.walltime_seconds().unwrap(), Some(3723));
    }

    #[test]
    fn walltime_rejects_garbage() {
        let run = RunConfig {
            walltime: "not-a-time".into(),
            ..Default::default()
        };
        assert!(run.walltime_seconds().is_err());
    }

    #[test]
    fn slots_defaults_to_one_and_floors_at_one() {
        assert_eq!(RunConfig::default().slots(), 1);
        let run = RunConfig {
            procs: "4".into(),
            ..Default::default()
        };
        assert_eq!(run.slots(), 4);
        let zero = RunConfig {
            procs: "0".into(),
            ..Default::default()
        };
        assert_eq!(zero.slots(), 1);
    }

    #[test]
    fn apply_parameters_substitutes_and_reports_modification() {
        let mut combo = Combination::new("$");
        combo.add("NAME", "NAME", "Pam", "NAME.Pam");
        let step = StudyStep::new(
            "greet",
            "says hello",
            RunConfig {
                cmd: "echo $(NAME)".into(),
                ..Default::default()
            },
        );
        let (modified, expanded) = step.apply_parameters(&combo);
        assert!(modified);
        assert_eq!(expanded.run.cmd, "echo Pam");
    }
}
