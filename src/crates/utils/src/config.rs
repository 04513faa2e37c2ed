//! Loading configuration-shaped documents (YAML/JSON) from disk.

use crate::error::{Result, UtilsError};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load and deserialize a YAML file.
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let content = std::fs::read_to_string(path.as_ref())?;
    serde_yaml::from_str(&content).map_err(|e| {
        UtilsError::Config(format!(
            "failed to parse YAML from {:?}: {}",
            path.as_ref(),
            e
        ))
    })
}

/// Load and deserialize a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let content = std::fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&content).map_err(|e| {
        UtilsError::Config(format!(
            "failed to parse JSON from {:?}: {}",
            path.as_ref(),
            e
        ))
    })
}

/// Load a YAML or JSON document, dispatching on file extension.
pub fn load_document<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path_ref = path.as_ref();
    let extension = path_ref.extension().and_then(|e| e.to_str()).ok_or_else(|| {
        UtilsError::Config(format!("unable to determine file extension for {:?}", path_ref))
    })?;

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => load_yaml(path_ref),
        "json" => load_json(path_ref),
        other => Err(UtilsError::Config(format!(
            "unsupported config file extension: {}",
            other
        ))),
    }
}

/// Serialize a value and write it as a YAML document, creating parent
/// directories as needed.
pub fn store_yaml<T: serde::Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path_ref = path.as_ref();
    if let Some(parent) = path_ref.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_yaml::to_string(value)
        .map_err(|e| UtilsError::Serialization(e.to_string()))?;
    std::fs::write(path_ref, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn load_yaml_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.yaml");
        std::fs::write(&path, "name: widget\ncount: 3\n").unwrap();
        let sample: Sample = load_yaml(&path).unwrap();
        assert_eq!(sample, Sample { name: "widget".into(), count: 3 });
    }

    #[test]
    fn load_document_dispatches_on_extension() {
        let dir = TempDir::new().unwrap();
        let json_path = dir.path().join("sample.json");
        std::fs::write(&json_path, r#"{"name":"widget","count":3}"#).unwrap();
        let sample: Sample = load_document(&json_path).unwrap();
        assert_eq!(sample.count, 3);
    }

    #[test]
    fn load_document_rejects_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "name = \"widget\"").unwrap();
        let result: Result<Sample> = load_document(&path);
        assert!(result.is_err());
    }

    #[test]
    fn store_yaml_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deep/sample.yaml");
        let sample = Sample { name: "widget".into(), count: 1 };
        store_yaml(&path, &sample).unwrap();
        let reloaded: Sample = load_yaml(&path).unwrap();
        assert_eq!(reloaded, sample);
    }
}
