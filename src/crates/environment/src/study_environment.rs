//! `StudyEnvironment`: the context a study's steps draw variables, labels,
//! and dependencies from when their text is expanded.

use crate::error::{EnvError, Result};
use crate::substitution::{Dependency, Substitution};
use std::collections::HashSet;

/// Owns every named item of a study's environment, in insertion order.
pub struct StudyEnvironment {
    substitutions: Vec<(String, Box<dyn Substitution>)>,
    labels: Vec<(String, Box<dyn Substitution>)>,
    dependencies: Vec<(String, Box<dyn Dependency>)>,
    tokens: HashSet<String>,
    names: HashSet<String>,
    is_set_up: bool,
}

impl Default for StudyEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl StudyEnvironment {
    pub fn new() -> Self {
        StudyEnvironment {
            substitutions: Vec::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            tokens: HashSet::new(),
            names: HashSet::new(),
            is_set_up: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_set_up(&self) -> bool {
        self.is_set_up
    }

    fn check_duplicate(&self, name: &str) -> Result<()> {
        if self.names.contains(name) {
            return Err(EnvError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Add a substitution. If its value embeds a token already registered
    /// by an earlier substitution, it's classified as a label and applied
    /// after dependencies and plain substitutions resolve their own tokens.
    pub fn add_substitution(&mut self, item: Box<dyn Substitution>) -> Result<()> {
        let name = item.name().to_string();
        self.check_duplicate(&name)?;

        let is_label = item
            .raw_value()
            .map(|value| self.tokens.iter().any(|token| value.contains(token.as_str())))
            .unwrap_or(false);

        if is_label {
            tracing::debug!(%name, "label detected");
            self.labels.push((name.clone(), item));
        } else {
            self.tokens.insert(item.token().to_string());
            self.substitutions.push((name.clone(), item));
        }

        self.names.insert(name);
        Ok(())
    }

    pub fn add_dependency(&mut self, item: Box<dyn Dependency>) -> Result<()> {
        let name = item.name().to_string();
        self.check_duplicate(&name)?;
        self.dependencies.push((name.clone(), item));
        self.names.insert(name);
        self.is_set_up = false;
        Ok(())
    }

    pub fn find(&self, key: &str) -> Option<&dyn Substitution> {
        if let Some((_, dep)) = self.dependencies.iter().find(|(n, _)| n == key) {
            return Some(dep.as_substitution());
        }
        if let Some((_, sub)) = self.substitutions.iter().find(|(n, _)| n == key) {
            return Some(sub.as_ref());
        }
        if let Some((_, label)) = self.labels.iter().find(|(n, _)| n == key) {
            return Some(label.as_ref());
        }
        None
    }

    /// Remove the named item from whichever collection holds it.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.names.len();
        self.dependencies.retain(|(n, _)| n != key);
        self.substitutions.retain(|(n, _)| n != key);
        self.labels.retain(|(n, _)| n != key);
        self.names.remove(key);
        self.names.len() != before
    }

    /// Acquire every dependency, passing the set of plain substitutions so
    /// a dependency's own path/url can be parameterized.
    pub fn acquire_environment(&mut self) -> Result<()> {
        if self.is_set_up {
            tracing::info!("environment already set up");
            return Ok(());
        }

        let subs: Vec<&dyn Substitution> = self.substitutions.iter().map(|(_, s)| s.as_ref()).collect();

        for (name, dependency) in self.dependencies.iter_mut() {
            tracing::info!(%name, "acquiring dependency");
            dependency.acquire(&subs)?;
        }

        self.is_set_up = true;
        Ok(())
    }

    /// Apply labels, then dependencies, then plain substitutions to `item`.
    pub fn apply_environment(&self, item: &str) -> String {
        if item.is_empty() {
            return item.to_string();
        }

        let mut out = item.to_string();
        for (_, label) in &self.labels {
            out = label.substitute(&out);
        }
        for (_, dependency) in &self.dependencies {
            out = dependency.substitute(&out);
        }
        for (_, substitution) in &self.substitutions {
            out = substitution.substitute(&out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substitution::Variable;

    #[test]
    fn add_rejects_duplicate_names() {
        let mut env = StudyEnvironment::new();
        env.add_substitution(Box::new(Variable::new("NAME", "Pam", "$").unwrap())).unwrap();
        let err = env
            .add_substitution(Box::new(Variable::new("NAME", "Jim", "$").unwrap()))
            .unwrap_err();
        assert!(matches!(err, EnvError::DuplicateName(_)));
    }

    #[test]
    fn apply_environment_resolves_substitutions() {
        let mut env = StudyEnvironment::new();
        env.add_substitution(Box::new(Variable::new("OUTPUT", "/tmp/study", "$").unwrap())).unwrap();
        assert_eq!(env.apply_environment("cd $(OUTPUT)"), "cd /tmp/study");
    }

    #[test]
    fn label_referencing_a_substitution_token_is_classified_separately() {
        let mut env = StudyEnvironment::new();
        env.add_substitution(Box::new(Variable::new("OUTPUT", "/tmp/study", "$").unwrap())).unwrap();
        env.add_substitution(Box::new(Variable::new("RUNDIR", "$(OUTPUT)/run", "$").unwrap())).unwrap();
        assert_eq!(env.labels.len(), 1);
        assert_eq!(env.substitutions.len(), 1);
    }

    #[test]
    fn find_and_remove_round_trip() {
        let mut env = StudyEnvironment::new();
        env.add_substitution(Box::new(Variable::new("NAME", "Pam", "$").unwrap())).unwrap();
        assert!(env.find("NAME").is_some());
        assert!(env.remove("NAME"));
        assert!(env.find("NAME").is_none());
    }
}
