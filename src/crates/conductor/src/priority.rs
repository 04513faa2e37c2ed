//! Priority policies: each named policy maps a step's depth in the
//! execution graph to an orderable weight. The execution block of a study
//! description names policies in application order; their weights combine
//! with the step name into a lexicographic sort key for admission.

use crate::error::{ConductorError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type PriorityPolicyFn = Arc<dyn Fn(u32) -> i64 + Send + Sync>;

/// Thread-safe registry of named priority policies.
#[derive(Clone)]
pub struct PriorityRegistry {
    policies: Arc<RwLock<HashMap<String, PriorityPolicyFn>>>,
}

impl PriorityRegistry {
    /// A registry with the two built-in policies already registered.
    pub fn new() -> Self {
        let registry = PriorityRegistry {
            policies: Arc::new(RwLock::new(HashMap::new())),
        };
        registry
            .register("breadth_first", Arc::new(|depth: u32| depth as i64))
            .expect("built-in policy name collision");
        registry
            .register("depth_first", Arc::new(|depth: u32| -(depth as i64)))
            .expect("built-in policy name collision");
        registry
    }

    pub fn register(&self, id: impl Into<String>, policy: PriorityPolicyFn) -> Result<()> {
        let id = id.into();
        let mut policies = self.policies.write().map_err(|_| ConductorError::LockPoisoned)?;
        if policies.contains_key(&id) {
            return Err(ConductorError::DuplicatePolicy(id));
        }
        policies.insert(id, policy);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PriorityPolicyFn>> {
        let policies = self.policies.read().map_err(|_| ConductorError::LockPoisoned)?;
        Ok(policies.get(id).cloned())
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let policies = self.policies.read().map_err(|_| ConductorError::LockPoisoned)?;
        Ok(policies.contains_key(id))
    }

    pub fn remove(&self, id: &str) -> Result<Option<PriorityPolicyFn>> {
        let mut policies = self.policies.write().map_err(|_| ConductorError::LockPoisoned)?;
        Ok(policies.remove(id))
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        let policies = self.policies.read().map_err(|_| ConductorError::LockPoisoned)?;
        Ok(policies.keys().cloned().collect())
    }

    /// Resolve `names` into a priority key builder. Unknown names are
    /// logged and skipped; an empty (or entirely-unknown) list falls back
    /// to `breadth_first` alone.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<PriorityPolicyFn>> {
        let mut resolved = Vec::new();
        for name in names {
            match self.get(name)? {
                Some(policy) => resolved.push(policy),
                None => tracing::warn!(policy = %name, "unknown priority policy, skipping"),
            }
        }
        if resolved.is_empty() {
            resolved.push(
                self.get("breadth_first")?
                    .expect("breadth_first is always registered"),
            );
        }
        Ok(resolved)
    }
}

impl Default for PriorityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the lexicographic sort key `(weights..., name)` for one step.
pub fn priority_key(policies: &[PriorityPolicyFn], depth: u32, name: &str) -> (Vec<i64>, String) {
    let weights = policies.iter().map(|p| p(depth)).collect();
    (weights, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadth_first_orders_shallow_before_deep() {
        let registry = PriorityRegistry::new();
        let policies = registry.resolve(&["breadth_first".to_string()]).unwrap();
        let shallow = priority_key(&policies, 1, "b");
        let deep = priority_key(&policies, 2, "a");
        assert!(shallow < deep);
    }

    #[test]
    fn depth_first_orders_deep_before_shallow() {
        let registry = PriorityRegistry::new();
        let policies = registry.resolve(&["depth_first".to_string()]).unwrap();
        let shallow = priority_key(&policies, 1, "b");
        let deep = priority_key(&policies, 2, "a");
        assert!(deep < shallow);
    }

    #[test]
    fn unknown_policy_name_falls_back_to_breadth_first() {
        let registry = PriorityRegistry::new();
        let policies = registry.resolve(&["nonesuch".to_string()]).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0](3), 3);
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let registry = PriorityRegistry::new();
        let result = registry.register("breadth_first", Arc::new(|d| d as i64));
        assert!(result.is_err());
    }

    #[test]
    fn tie_break_falls_back_to_name() {
        let registry = PriorityRegistry::new();
        let policies = registry.resolve(&["breadth_first".to_string()]).unwrap();
        let a = priority_key(&policies, 1, "a");
        let b = priority_key(&policies, 1, "b");
        assert!(a < b);
    }
}
