//! A dependency that already lives on the local filesystem; `acquire` only
//! verifies it is there.

use crate::error::{EnvError, Result};
use crate::substitution::{Dependency, Substitution};
use std::path::{Path, PathBuf};

/// Resolve `value` to an absolute path without requiring it to exist yet.
pub(crate) fn absolute_path(value: &str) -> String {
    let path = Path::new(value);
    if path.is_absolute() {
        return value.to_string();
    }
    let mut base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    base.push(path);
    base.to_string_lossy().into_owned()
}

#[derive(Debug, Clone)]
pub struct PathDependency {
    name: String,
    value: String,
    token: String,
    acquired: bool,
}

impl PathDependency {
    pub fn new(name: impl Into<String>, value: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || value.is_empty() {
            return Err(EnvError::Incomplete(name));
        }
        let absolute = absolute_path(&value);
        Ok(PathDependency {
            name,
            value: absolute,
            token: token.into(),
            acquired: false,
        })
    }
}

impl Substitution for PathDependency {
    fn name(&self) -> &str {
        &self.name
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn substitute(&self, data: &str) -> String {
        data.replace(&self.get_var(), &self.value)
    }
}

impl Dependency for PathDependency {
    fn acquire(&mut self, _substitutions: &[&dyn Substitution]) -> Result<()> {
        if self.acquired {
            return Ok(());
        }

        if !Path::new(&self.value).exists() {
            return Err(EnvError::PathNotFound {
                name: self.name.clone(),
                path: self.value.clone(),
            });
        }

        self.acquired = true;
        Ok(())
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }

    fn as_substitution(&self) -> &dyn Substitution {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_succeeds_for_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut dep = PathDependency::new("DATA", dir.path().to_str().unwrap(), "$").unwrap();
        let subs: Vec<&dyn Substitution> = Vec::new();
        dep.acquire(&subs).unwrap();
        assert!(dep.is_acquired());
    }

    #[test]
    fn acquire_fails_for_missing_path() {
        let mut dep = PathDependency::new("DATA", "/does/not/exist/anywhere", "$").unwrap();
        let subs: Vec<&dyn Substitution> = Vec::new();
        assert!(dep.acquire(&subs).is_err());
    }

    #[test]
    fn substitute_replaces_token_with_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let dep = PathDependency::new("DATA", dir.path().to_str().unwrap(), "$").unwrap();
        let substituted = dep.substitute("ls $(DATA)");
        assert!(substituted.starts_with("ls "));
        assert!(substituted.contains(dir.path().to_str().unwrap()));
    }
}
