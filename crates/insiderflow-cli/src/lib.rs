//! Ingestion worker and command implementations for the `insiderflow` binary.

pub mod commands;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod worker;

pub use pipeline::{EntityReport, FilingOutcome, Pipeline, PipelineConfig, PipelineError};
pub use worker::{WorkerReport, run_worker};
