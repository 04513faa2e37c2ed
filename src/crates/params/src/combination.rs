//! A single row of a parameter table: a substitution object carrying value,
//! label, and name tokens for every parameter key in that row.

use std::collections::HashSet;

/// One concrete assignment of every parameter key to a `(value, label,
/// name)` triple, with a configurable substitution token (default `$`).
#[derive(Debug, Clone)]
pub struct Combination {
    token: String,
    // Insertion order matters: `apply` replaces labels before values, and
    // labels may themselves embed a value token.
    values: Vec<(String, String)>,
    labels: Vec<(String, String)>,
    names: Vec<(String, String)>,
}

impl Combination {
    pub fn new(token: impl Into<String>) -> Self {
        Combination {
            token: token.into(),
            values: Vec::new(),
            labels: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Record the `(name, value, label)` triple for parameter `key`.
    pub fn add(&mut self, key: &str, name: &str, value: &str, label: &str) {
        self.values.push((key.to_string(), value.to_string()));
        self.labels.push((key.to_string(), label.to_string()));
        self.names.push((key.to_string(), name.to_string()));
    }

    fn value_token(&self, key: &str) -> String {
        format!("{}({})", self.token, key)
    }

    fn label_token(&self, key: &str) -> String {
        format!("{}({}.label)", self.token, key)
    }

    fn name_token(&self, key: &str) -> String {
        format!("{}({}.name)", self.token, key)
    }

    /// Apply this combination's substitutions to `item`: labels first, then
    /// values, then names — labels may themselves contain a value token, so
    /// order is significant.
    pub fn apply(&self, item: &str) -> String {
        let mut out = item.to_string();
        for (key, label) in &self.labels {
            out = out.replace(&self.label_token(key), label);
        }
        for (key, value) in &self.values {
            out = out.replace(&self.value_token(key), value);
        }
        for (key, name) in &self.names {
            out = out.replace(&self.name_token(key), name);
        }
        out
    }

    /// Dotted concatenation of every key's label, in insertion order.
    pub fn to_combo_string(&self) -> String {
        self.labels
            .iter()
            .map(|(_, label)| label.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Dotted concatenation of the labels of `keys`, sorted lexicographically
    /// by key — the canonical expansion suffix used for workspace names.
    pub fn param_string(&self, keys: &HashSet<String>) -> String {
        let mut sorted: Vec<&str> = keys.iter().map(|s| s.as_str()).collect();
        sorted.sort_unstable();
        sorted
            .into_iter()
            .filter_map(|key| self.labels.iter().find(|(k, _)| k == key).map(|(_, l)| l.as_str()))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn param_vals(&self) -> &[(String, String)] {
        &self.values
    }

    pub fn param_labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}
