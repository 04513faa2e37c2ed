//! Script adapters: the backend-facing half of the conductor. Given a
//! `StudyStep` and a workspace, an adapter writes an executable script,
//! submits it, and reports job status/cancellation in a uniform vocabulary.

pub mod batch;
pub mod error;
pub mod flux;
pub mod local_pool;
pub mod lsf;
pub mod script_adapter;
pub mod slurm;

pub use batch::BatchScriptAdapter;
pub use error::{Result, SchedulerError};
pub use flux::FluxAdapter;
pub use local_pool::LocalPoolAdapter;
pub use lsf::LsfAdapter;
pub use script_adapter::{LauncherOverride, ScriptAdapter, SchedulerScriptAdapter};
pub use slurm::SlurmAdapter;

/// Build the adapter named by a study's `batch.type` entry.
pub fn build_adapter(
    adapter_type: &str,
    params: &std::collections::HashMap<String, String>,
) -> Result<Box<dyn SchedulerScriptAdapter>> {
    let get = |key: &str| params.get(key).map(String::as_str).unwrap_or("");
    match adapter_type {
        "local" | "local_pool" => {
            let workers: usize = get("num_workers").parse().unwrap_or(1);
            Ok(Box::new(LocalPoolAdapter::new(workers)))
        }
        "slurm" => Ok(Box::new(SlurmAdapter::new(
            get("host"),
            get("bank"),
            get("queue"),
            get("reservation"),
        ))),
        "lsf" => Ok(Box::new(LsfAdapter::new(get("host"), get("bank"), get("queue")))),
        "flux" => Ok(Box::new(FluxAdapter::new(get("bank"), get("queue")))),
        other => Err(SchedulerError::UnknownAdapter(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_adapter_recognizes_local_pool() {
        let params = std::collections::HashMap::new();
        let adapter = build_adapter("local", &params).unwrap();
        assert!(!adapter.batch_parameters().is_empty());
    }

    #[test]
    fn build_adapter_rejects_unknown_type() {
        let params = std::collections::HashMap::new();
        assert!(build_adapter("nonesuch", &params).is_err());
    }
}
