//! A dependency cloned from a remote git repository, optionally pinned to
//! a branch, tag, or commit hash (exactly one of the three, or none).

use crate::error::{EnvError, Result};
use crate::path_dependency::absolute_path;
use crate::substitution::{Dependency, Substitution};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct GitRef {
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub hash: Option<String>,
}

impl GitRef {
    fn validate(&self, name: &str) -> Result<()> {
        let set = [&self.branch, &self.tag, &self.hash]
            .into_iter()
            .filter(|r| r.is_some())
            .count();
        if set > 1 {
            return Err(EnvError::ConflictingGitRef(name.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GitDependency {
    name: String,
    url: String,
    path: String,
    token: String,
    reference: GitRef,
    acquired: bool,
}

impl GitDependency {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        path: impl Into<String>,
        token: impl Into<String>,
        reference: GitRef,
    ) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        let path = path.into();
        if name.is_empty() || url.is_empty() || path.is_empty() {
            return Err(EnvError::Incomplete(name));
        }
        reference.validate(&name)?;

        let resolved_path = if Path::new(&path).exists() {
            absolute_path(&path)
        } else {
            path
        };

        Ok(GitDependency {
            name,
            url,
            path: resolved_path,
            token: token.into(),
            reference,
            acquired: false,
        })
    }

    fn clone_target(&self) -> PathBuf {
        Path::new(&self.path).join(&self.name)
    }

    fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> Result<()> {
        let mut command = Command::new("git");
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let status = command.status().map_err(|e| EnvError::GitCommandFailed {
            name: self.name.clone(),
            detail: e.to_string(),
        })?;
        if !status.success() {
            return Err(EnvError::GitCommandFailed {
                name: self.name.clone(),
                detail: format!("`git {}` exited with {}", args.join(" "), status),
            });
        }
        Ok(())
    }
}

impl Substitution for GitDependency {
    fn name(&self) -> &str {
        &self.name
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn substitute(&self, data: &str) -> String {
        let path = self.clone_target();
        data.replace(&self.get_var(), &path.to_string_lossy())
    }
}

impl Dependency for GitDependency {
    fn acquire(&mut self, substitutions: &[&dyn Substitution]) -> Result<()> {
        if self.acquired {
            return Ok(());
        }

        for substitution in substitutions {
            self.path = substitution.substitute(&self.path);
            self.url = substitution.substitute(&self.url);
        }

        let target = self.clone_target();
        if target.exists() {
            return Err(EnvError::DestinationExists(target.to_string_lossy().into_owned()));
        }

        tracing::info!(url = %self.url, "checking connectivity to remote repository");
        self.run_git(&["ls-remote", &self.url], None)?;

        tracing::info!(name = %self.name, url = %self.url, "cloning repository");
        self.run_git(&["clone", &self.url, &target.to_string_lossy()], None)?;

        if let Some(hash) = self.reference.hash.clone() {
            tracing::info!(hash = %hash, "checking out commit");
            self.run_git(&["checkout", &hash], Some(&target))?;
        } else if let Some(tag) = self.reference.tag.clone() {
            tracing::info!(tag = %tag, "checking out tag");
            self.run_git(&["checkout", &format!("tags/{}", tag)], Some(&target))?;
        } else if let Some(branch) = self.reference.branch.clone() {
            tracing::info!(branch = %branch, "checking out branch");
            self.run_git(&["checkout", &branch], Some(&target))?;
        }

        if !target.exists() {
            return Err(EnvError::PathNotFound {
                name: self.name.clone(),
                path: target.to_string_lossy().into_owned(),
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
    fn rejects_conflicting_refs() {
        let reference = GitRef {
            branch: Some("main".into()),
            tag: Some("v1".into()),
            hash: None,
        };
        let err = GitDependency::new("REPO", "git@example.com:x.git", "/tmp", "$", reference).unwrap_err();
        assert!(matches!(err, EnvError::ConflictingGitRef(_)));
    }

    #[test]
    fn accepts_single_ref() {
        let dir = tempfile::tempdir().unwrap();
        let reference = GitRef {
            branch: Some("main".into()),
            tag: None,
            hash: None,
        };
        let dep = GitDependency::new("REPO", "git@example.com:x.git", dir.path().to_str().unwrap(), "$", reference);
        assert!(dep.is_ok());
    }

    #[test]
    fn substitute_points_at_clone_target() {
        let dir = tempfile::tempdir().unwrap();
        let dep = GitDependency::new("REPO", "git@example.com:x.git", dir.path().to_str().unwrap(), "$", GitRef::default()).unwrap();
        let substituted = dep.substitute("cd $(REPO)");
        assert!(substituted.contains("REPO"));
    }
}
