//! The abstract study DAG, its parameter expansion into a concrete
//! execution graph, and the records that graph's nodes carry.

pub mod error;
pub mod execution_graph;
pub mod step;
pub mod study;

pub use error::{Result, StudyError};
pub use execution_graph::{AdapterConfig, ExecutionGraph, ExecutionStepRecord, SOURCE};
pub use step::{RunConfig, StudyStep};
pub use study::Study;
