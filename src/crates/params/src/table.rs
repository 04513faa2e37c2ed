//! The rectangular parameter table: every key's values/labels/names share
//! one row count, and iterating the table yields one `Combination` per row.

use crate::combination::Combination;
use crate::error::{ParamError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::HashSet;

/// How a parameter's per-row labels are derived.
pub enum LabelSpec {
    /// One label string per row, supplied directly.
    PerRow(Vec<String>),
    /// A single pattern containing the label-inner-token (default `%%`),
    /// instantiated per row by substituting the row's stringified value.
    Pattern(String),
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub params: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ParameterTable {
    token: String,
    label_token: String,
    keys: Vec<String>,
    values: HashMap<String, Vec<String>>,
    labels: HashMap<String, Vec<String>>,
    names: HashMap<String, String>,
    length: Option<usize>,
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterTable {
    pub fn new() -> Self {
        ParameterTable::with_tokens("$", "%%")
    }

    pub fn with_tokens(token: impl Into<String>, label_token: impl Into<String>) -> Self {
        ParameterTable {
            token: token.into(),
            label_token: label_token.into(),
            keys: Vec::new(),
            values: HashMap::new(),
            labels: HashMap::new(),
            names: HashMap::new(),
            length: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.length.unwrap_or(0)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Add a parameter. The first call establishes the table's row count;
    /// every subsequent call must supply the same number of values.
    pub fn add_parameter(
        &mut self,
        key: &str,
        values: Vec<String>,
        label: LabelSpec,
        name: Option<&str>,
    ) -> Result<()> {
        let n = values.len();
        match self.length {
            Some(expected) if expected != n => {
                return Err(ParamError::SizeMismatch {
                    key: key.to_string(),
                    expected,
                    actual: n,
                })
            }
            None => self.length = Some(n),
            _ => {}
        }

        let resolved_labels = match label {
            LabelSpec::PerRow(rows) => {
                if rows.len() != n {
                    return Err(ParamError::LabelSizeMismatch {
                        key: key.to_string(),
                        expected: n,
                        actual: rows.len(),
                    });
                }
                rows
            }
            LabelSpec::Pattern(pattern) => values
                .iter()
                .map(|v| pattern.replace(&self.label_token, v))
                .collect(),
        };

        if self.values.contains_key(key) {
            tracing::warn!(%key, "overriding existing parameter definition");
        } else {
            self.keys.push(key.to_string());
        }

        self.values.insert(key.to_string(), values);
        self.labels.insert(key.to_string(), resolved_labels);
        self.names
            .insert(key.to_string(), name.map(String::from).unwrap_or_else(|| key.to_string()));

        Ok(())
    }

    /// The default label pattern used when no explicit label is supplied.
    pub fn default_label_pattern(key: &str, label_token: &str) -> String {
        format!("{}.{}", key, label_token)
    }

    /// Every combination (row), in row order.
    pub fn combinations(&self) -> Vec<Combination> {
        (0..self.len())
            .map(|i| {
                let mut combo = Combination::new(self.token.clone());
                for key in &self.keys {
                    let value = &self.values[key][i];
                    let label = &self.labels[key][i];
                    let name = &self.names[key];
                    combo.add(key, name, value, label);
                }
                combo
            })
            .collect()
    }

    /// Walk `item` (a JSON-shaped view of a step's fields) recursively
    /// through strings, arrays, and objects, returning the set of declared
    /// parameter keys actually referenced via `$(KEY)` / `$(KEY.label)` /
    /// `$(KEY.name)`.
    pub fn get_used_parameters(&self, item: &Value) -> HashSet<String> {
        let mut strings = Vec::new();
        collect_strings(item, &mut strings);

        let mut used = HashSet::new();
        for key in &self.keys {
            let pattern = format!(
                r"{}\({}(\.\w+)?\)",
                regex::escape(&self.token),
                regex::escape(key)
            );
            // Constructed from a fixed, escaped token/key pair; always valid.
            let re = Regex::new(&pattern).expect("constructed pattern is always valid");
            if strings.iter().any(|s| re.is_match(s)) {
                used.insert(key.clone());
            }
        }
        used
    }

    pub fn get_metadata(&self) -> HashMap<String, Metadata> {
        self.combinations()
            .into_iter()
            .map(|combo| {
                (
                    combo.to_combo_string(),
                    Metadata {
                        params: combo.param_vals().to_vec(),
                        labels: combo.param_labels().to_vec(),
                    },
                )
            })
            .collect()
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_parameter_establishes_length() {
        let mut table = ParameterTable::new();
        table
            .add_parameter("NAME", vec!["Pam".into(), "Jim".into()], LabelSpec::Pattern("NAME.%%".into()), None)
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn add_parameter_rejects_size_mismatch() {
        let mut table = ParameterTable::new();
        table
            .add_parameter("NAME", vec!["Pam".into(), "Jim".into()], LabelSpec::Pattern("NAME.%%".into()), None)
            .unwrap();
        let err = table
            .add_parameter("AGE", vec!["1".into()], LabelSpec::Pattern("AGE.%%".into()), None)
            .unwrap_err();
        assert!(matches!(err, ParamError::SizeMismatch { .. }));
    }

    #[test]
    fn combinations_yield_one_row_each() {
        let mut table = ParameterTable::new();
        table
            .add_parameter("NAME", vec!["Pam".into(), "Jim".into()], LabelSpec::Pattern("NAME.%%".into()), None)
            .unwrap();
        let combos = table.combinations();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].value_of("NAME"), Some("Pam"));
        assert_eq!(combos[1].value_of("NAME"), Some("Jim"));
    }

    #[test]
    fn get_used_parameters_finds_direct_and_label_references() {
        let mut table = ParameterTable::new();
        table
            .add_parameter("NAME", vec!["Pam".into()], LabelSpec::Pattern("NAME.%%".into()), None)
            .unwrap();
        table
            .add_parameter("AGE", vec!["1".into()], LabelSpec::Pattern("AGE.%%".into()), None)
            .unwrap();

        let step = json!({
            "cmd": "echo $(NAME) $(NAME.label)",
            "restart": "",
            "depends": [],
        });
        let used = table.get_used_parameters(&step);
        assert!(used.contains("NAME"));
        assert!(!used.contains("AGE"));
    }
}
