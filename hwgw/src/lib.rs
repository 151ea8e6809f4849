//! HWGW batch pipeline.
//!
//! Target scoring, thread planning, prep, timed batch execution, and the
//! cycle orchestrator that ties them to the reservation directory.

pub mod batch;
pub mod pipeline;
pub mod planner;
pub mod prepper;
pub mod targets;

pub use pipeline::{CycleOutcome, CyclePipeline, CycleReport, PipelineError};
