//! The control loop that drives a staged execution graph to completion:
//! polling job status, advancing per-step state, admitting ready steps under
//! a priority/throttle policy, submitting them, and persisting a snapshot
//! after every tick.

pub mod conductor;
pub mod error;
pub mod priority;
pub mod snapshot;
pub mod study_description;

pub use conductor::{Conductor, DriverOutcome};
pub use error::{ConductorError, Result};
pub use priority::{priority_key, PriorityPolicyFn, PriorityRegistry};
pub use study_description::StudyDescription;
