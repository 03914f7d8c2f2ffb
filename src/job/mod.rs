//! Per-job configuration and the staged job pipeline.

/// Template and job JSON shapes.
pub mod config;
/// Staged execution of one job.
pub mod pipeline;
/// Job-scoped scratch directory.
pub mod scratch;
